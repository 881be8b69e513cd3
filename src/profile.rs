//! Heap profile recorded by [`MemoryStore`](crate::MemoryStore) and the
//! rendering used by `hs_print`.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    fmt::{Display, Formatter},
    path::Path,
};

use backtrace::SymbolName;
use libc::c_void;
use num_format::{Locale, ToFormattedString};
use radix_trie::{iter::Children, SubTrie, Trie, TrieCommon, TrieKey};
use serde::{Deserialize, Serialize};

use crate::{error, event::ThreadIdentity};

// Call stack returned by `backtrace::trace()`.
pub(crate) type CallStack = Vec<usize>;

// For each call stack, track (allocation size -> number of allocations map)
type AllocCounts = HashMap<usize, usize>;

#[derive(Clone, Debug)]
enum CallStackStats {
    Detailed(AllocCounts),
    // Aggregate number of sampled objects/total bytes.
    Summary(usize, usize),
}

impl CallStackStats {
    fn new() -> Self {
        CallStackStats::Summary(0, 0)
    }

    fn summarize(&self) -> CallStackStats {
        match self {
            CallStackStats::Summary(..) => self.clone(),
            CallStackStats::Detailed(counts) => {
                let mut objects = 0;
                let mut bytes = 0;
                for (b, c) in counts.iter() {
                    objects += c;
                    bytes += c * b;
                }
                CallStackStats::Summary(objects, bytes)
            }
        }
    }

    fn merge(&mut self, other: &CallStackStats) {
        if let CallStackStats::Summary(self_objects, self_bytes) = self.summarize() {
            if let CallStackStats::Summary(other_objects, other_bytes) = other.summarize() {
                *self =
                    CallStackStats::Summary(self_objects + other_objects, self_bytes + other_bytes);
            }
        }
    }

    fn format_totals<W: fmt::Write>(&self, f: &mut W) -> Result<(), fmt::Error> {
        match self {
            CallStackStats::Summary(objects, bytes) => write!(
                f,
                "{} objects, {}B",
                objects.to_formatted_string(&Locale::en),
                bytes.to_formatted_string(&Locale::en)
            ),
            CallStackStats::Detailed(_) => self.summarize().format_totals(f),
        }
    }

    fn num_objects(&self) -> usize {
        match self {
            CallStackStats::Summary(objects, _) => *objects,
            CallStackStats::Detailed(_) => self.summarize().num_objects(),
        }
    }
}

/// Sampled allocations grouped by call stack.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Profile {
    callstacks: Trie<CallStack, AllocCounts>,
    symbols: HashMap<usize, String>,
    // Samples taken on each thread.
    threads: HashMap<u64, usize>,
    sampling_period: u64,
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.fmt_with_threshold(0.0, f)
    }
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> error::Result<Self> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> error::Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn to_bytes(&self) -> error::Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    pub fn sampling_period(&self) -> u64 {
        self.sampling_period
    }

    pub(crate) fn set_sampling_period(&mut self, period: u64) {
        self.sampling_period = period;
    }

    /// Number of sampled objects across all call stacks.
    pub fn total_objects(&self) -> usize {
        self.callstacks
            .values()
            .map(|counts| counts.values().sum::<usize>())
            .sum()
    }

    /// Total size of the sampled objects.
    pub fn total_bytes(&self) -> usize {
        self.callstacks
            .values()
            .map(|counts| counts.iter().map(|(b, c)| b * c).sum::<usize>())
            .sum()
    }

    pub fn num_callstacks(&self) -> usize {
        self.callstacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callstacks.is_empty()
    }

    pub fn thread_samples(&self, thread: ThreadIdentity) -> usize {
        self.threads.get(&thread.as_u64()).copied().unwrap_or(0)
    }

    // Record a sampled object of size `size` allocated at `callstack`.
    pub(crate) fn record_allocation(
        &mut self,
        thread: ThreadIdentity,
        callstack: &CallStack,
        size: usize,
    ) {
        *self.threads.entry(thread.as_u64()).or_insert(0) += 1;
        match self.callstacks.get_mut(callstack) {
            Some(counts) => *counts.entry(size).or_insert(0) += 1,
            None => {
                self.callstacks
                    .insert(callstack.clone(), std::iter::once((size, 1)).collect());
            }
        }
    }

    // Forget one object of size `size` allocated at `callstack`.
    pub(crate) fn record_free(&mut self, callstack: &CallStack, size: usize) {
        let now_empty = match self.callstacks.get_mut(callstack) {
            Some(counts) => {
                if let Entry::Occupied(mut oe) = counts.entry(size) {
                    if *oe.get() <= 1 {
                        oe.remove();
                    } else {
                        *oe.get_mut() -= 1;
                    }
                }
                counts.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.callstacks.remove(callstack);
        }
    }

    pub(crate) fn clear(&mut self) {
        let sampling_period = self.sampling_period;
        *self = Profile::new();
        self.sampling_period = sampling_period;
    }

    // Resolve every frame that does not have a symbol yet.
    // Must be called while running in the context of the profiled program.
    pub(crate) fn resolve_symbols(&mut self) {
        for callstack in self.callstacks.keys() {
            for frame in callstack {
                if let Entry::Vacant(ve) = self.symbols.entry(*frame) {
                    ve.insert(Self::resolve(*frame));
                }
            }
        }
    }

    // Convert frame address into string.
    fn resolve(frame: usize) -> String {
        let mut sym = format!("{:#x}", frame);
        backtrace::resolve(frame as *mut c_void, |s| {
            sym = format!(
                "{} (in {},{}:{})",
                s.name().unwrap_or_else(|| SymbolName::new(&[])),
                s.filename().unwrap_or_else(|| Path::new("")).display(),
                s.lineno().unwrap_or(0),
                s.colno().unwrap_or(0)
            )
        });
        sym
    }

    // Use self.symbols to resolve a single frame in a stack trace.
    fn resolve_symbol(&self, frame: usize) -> String {
        self.symbols
            .get(&frame)
            .cloned()
            .unwrap_or_else(|| format!("{:#x}", frame))
    }

    /// Merge two profiles.
    pub fn merge(&mut self, other: &Profile) {
        for (callstack, counts) in other.callstacks.iter() {
            match self.callstacks.get_mut(callstack) {
                None => {
                    self.callstacks.insert(callstack.clone(), counts.clone());
                }
                Some(old_counts) => {
                    Self::merge_counts(old_counts, counts);
                }
            }
        }

        for (frame, symbol) in other.symbols.iter() {
            if let Entry::Vacant(ve) = self.symbols.entry(*frame) {
                ve.insert(symbol.clone());
            }
        }

        for (thread, samples) in other.threads.iter() {
            *self.threads.entry(*thread).or_insert(0) += samples;
        }

        if self.sampling_period == 0 {
            self.sampling_period = other.sampling_period;
        }
    }

    fn merge_counts(this: &mut AllocCounts, other: &AllocCounts) {
        for (size, cnt) in other.iter() {
            *this.entry(*size).or_insert(0) += *cnt;
        }
    }

    fn summarize(&self) -> Trie<CallStack, CallStackStats> {
        let mut all_stacks = Trie::new();
        for (callstack, stats) in self.callstacks.iter() {
            all_stacks.insert(callstack.clone(), CallStackStats::Detailed(stats.clone()));
            for range in 1..callstack.len().saturating_sub(1) {
                let prefix = Vec::from(&callstack.as_slice()[0..range]);
                if all_stacks.get(&prefix).is_none() {
                    all_stacks.insert(prefix, CallStackStats::new());
                }
            }
        }
        let mut summary = Trie::new();
        Self::aggregate_stats(&mut summary, &all_stacks);
        summary
    }

    // Scan the trie, store aggregate allocation counts in each node
    fn aggregate_stats<'a, T: Clone + TrieCommon<'a, CallStack, CallStackStats>>(
        trie: &mut Trie<CallStack, CallStackStats>,
        node: T,
    ) -> CallStackStats {
        let mut stats = node
            .clone()
            .value()
            .cloned()
            .unwrap_or_else(CallStackStats::new);
        for child in node.clone().children() {
            let child_stats = Self::aggregate_stats(trie, &child);
            stats.merge(&child_stats);
        }
        if node.clone().value().is_some() {
            if let Some(key) = node.key() {
                trie.insert(key.clone(), stats.clone());
            }
        }
        stats
    }

    /// Render the profile as a call tree, folding subtrees that account for
    /// fewer than `threshold` percent of the sampled objects.
    pub fn fmt_with_threshold<W: fmt::Write>(
        &self,
        threshold: f64,
        f: &mut W,
    ) -> Result<(), fmt::Error> {
        write!(
            f,
            "{} sampled objects, {}B, {} threads (sampling period {})",
            self.total_objects().to_formatted_string(&Locale::en),
            self.total_bytes().to_formatted_string(&Locale::en),
            self.threads.len(),
            self.sampling_period
        )?;
        let summary = self.summarize();
        let total_objects: usize = trie_children_with_keys(&summary)
            .filter_map(|child| child.value().map(CallStackStats::num_objects))
            .sum();
        if total_objects == 0 {
            return Ok(());
        }
        self.format_summary(&summary, total_objects, threshold, "", f)
    }

    fn format_summary<'a, T: Clone + TrieCommon<'a, CallStack, CallStackStats>, W: fmt::Write>(
        &self,
        stats: T,
        total_objects: usize,
        threshold: f64,
        prefix: &str,
        f: &mut W,
    ) -> Result<(), fmt::Error> {
        if let (Some(key), Some(value)) = (stats.clone().key(), stats.clone().value()) {
            f.write_str("\n")?;
            f.write_str(prefix)?;
            f.write_str("->")?;
            value.format_totals(f)?;
            f.write_str(": ")?;
            if let Some(frame) = key.last() {
                f.write_str(self.resolve_symbol(*frame).as_str())?;
            }
        }

        let mut children_sorted: Vec<_> = trie_children_with_keys(stats).collect();
        let nchildren = children_sorted.len();
        children_sorted.sort_by_key(|c| {
            std::cmp::Reverse(c.value().map(CallStackStats::num_objects).unwrap_or(0))
        });

        let mut below_threshold = 0;
        for (idx, child) in children_sorted.iter().enumerate() {
            let objects = child.value().map(CallStackStats::num_objects).unwrap_or(0);
            if 100.0 * (objects as f64) / (total_objects as f64) < threshold {
                below_threshold += objects;
                continue;
            }
            let child_prefix = if idx == nchildren - 1 {
                format!("{}  ", prefix)
            } else {
                format!("{} |", prefix)
            };
            self.format_summary(child, total_objects, threshold, &child_prefix, f)?;
        }

        if below_threshold > 0 {
            write!(
                f,
                "\n{}  ->{} objects in places below hs_print threshold ({}%)",
                prefix, below_threshold, threshold
            )?;
        }

        Ok(())
    }
}

// Iterate through the nearest descendants that have keys.
struct ChildrenWithKey<'a, K, V> {
    stack: Vec<Children<'a, K, V>>,
}

impl<'a, K, V> ChildrenWithKey<'a, K, V> {
    fn new<T>(trie: T) -> Self
    where
        T: TrieCommon<'a, K, V>,
        K: TrieKey,
    {
        ChildrenWithKey {
            stack: vec![trie.children()],
        }
    }
}

impl<'a, K, V> Iterator for ChildrenWithKey<'a, K, V>
where
    K: TrieKey,
{
    type Item = SubTrie<'a, K, V>;

    fn next(&mut self) -> Option<SubTrie<'a, K, V>> {
        loop {
            let child = match self.stack.last_mut() {
                None => return None,
                Some(children) => children.next(),
            };
            match child {
                None => {
                    self.stack.pop();
                }
                Some(child) => match child.key() {
                    Some(_) => return Some(child),
                    None => self.stack.push(child.children()),
                },
            }
        }
    }
}

fn trie_children_with_keys<'a, K, V, T>(trie: T) -> ChildrenWithKey<'a, K, V>
where
    T: Clone + TrieCommon<'a, K, V>,
    K: TrieKey,
{
    ChildrenWithKey::new(trie)
}
