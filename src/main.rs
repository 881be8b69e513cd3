use args::Args;
use getopts::Occur;
use glob::glob;
use heapster::Profile;
use log::info;

const PROGRAM_DESC: &str = "Merge and display heapster profile snapshots";
const PROGRAM_NAME: &str = "hs_print";

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = Args::new(PROGRAM_NAME, PROGRAM_DESC);
    args.option(
        "i",
        "input",
        "Snapshot file, or glob pattern matching several snapshots",
        "PATTERN",
        Occur::Req,
        None,
    );
    args.option(
        "t",
        "threshold",
        "Fold call stacks holding less than this percentage of sampled objects",
        "PERCENT",
        Occur::Optional,
        Some("0".to_string()),
    );

    args.parse_from_cli()?;

    let pattern: String = args.value_of("input")?;
    let threshold: f64 = args.value_of("threshold")?;
    if threshold < 0.0 {
        anyhow::bail!("threshold must not be negative, got {}", threshold);
    }

    // Aggregate all snapshots into one profile.
    let mut aggregate_profile = Profile::new();
    let mut nprofiles = 0;

    for path in glob(pattern.as_str())? {
        let path = path?;
        info!("found profile in {}", path.display());
        aggregate_profile.merge(&Profile::from_file(&path)?);
        nprofiles += 1;
    }

    if nprofiles == 0 {
        anyhow::bail!("no profile snapshots match '{}'", pattern);
    }

    let mut out = String::new();
    aggregate_profile.fmt_with_threshold(threshold, &mut out)?;
    println!("Aggregate profile ({} snapshots):\n{}", nprofiles, out);

    Ok(())
}
