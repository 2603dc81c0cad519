//! Simulation statistics collection and reporting.
//!
//! This module tracks performance metrics for the core. It provides:
//! 1. **Cycle and IPC:** cycles, committed uops/macro-ops, derived rates.
//! 2. **Per-stage width histograms:** fetch, frontend, dispatch, issue,
//!    writeback, commit.
//! 3. **Stall and result breakdowns:** why each stage yielded, issue result
//!    codes, commit result codes.
//! 4. **Memory pipeline:** forwarding sources, replay reasons, alias events.

use crate::config::MAX_CLUSTERS;
use crate::isa::OPCLASS_COUNT;

/// Fixed-size width histogram (index = items processed that cycle).
pub type WidthHistogram = Vec<u64>;

/// Frontend (rename) stall reasons; totals 100% of rename-stage endings.
#[derive(Clone, Debug, Default)]
pub struct FrontendStats {
    pub status_complete: u64,
    pub status_fetchq_empty: u64,
    pub status_rob_full: u64,
    pub status_physregs_full: u64,
    pub status_ldq_full: u64,
    pub status_stq_full: u64,
    pub status_lsq_full: u64,
    /// Renamed destination breakdown.
    pub renamed_none: u64,
    pub renamed_reg: u64,
    pub renamed_flags: u64,
    pub renamed_reg_and_flags: u64,
    pub width: WidthHistogram,
}

/// Fetch stop reasons; totals 100% of fetch-stage endings.
#[derive(Clone, Debug, Default)]
pub struct FetchStats {
    pub stop_icache_miss: u64,
    pub stop_fetchq_full: u64,
    pub stop_bogus_rip: u64,
    pub stop_branch_taken: u64,
    pub stop_full_width: u64,
    pub blocks_fetched: u64,
    pub uops_fetched: u64,
    pub user_insns_fetched: u64,
    pub width: WidthHistogram,
    pub opclass: [u64; OPCLASS_COUNT],
}

/// Dispatch behavior.
#[derive(Clone, Debug, Default)]
pub struct DispatchStats {
    pub cluster: [u64; MAX_CLUSTERS],
    pub cluster_none_avail: u64,
    pub width: WidthHistogram,
}

/// Issue results; totals 100% of issue attempts.
#[derive(Clone, Debug, Default)]
pub struct IssueStats {
    pub result_no_fu: u64,
    pub result_replay: u64,
    pub result_misspeculation: u64,
    pub result_branch_mispredict: u64,
    pub result_exception: u64,
    pub result_complete: u64,
    pub total_uops: u64,
    pub width: Vec<WidthHistogram>,
    pub opclass: [u64; OPCLASS_COUNT],
}

/// Load pipeline behavior.
#[derive(Clone, Debug, Default)]
pub struct LoadStats {
    pub issue_complete: u64,
    pub issue_miss: u64,
    pub issue_exception: u64,
    pub issue_unaligned: u64,
    pub issue_replay_sfr_addr_not_ready: u64,
    pub issue_replay_sfr_data_not_ready: u64,
    pub issue_replay_missbuf_full: u64,
    pub forward_from_cache: u64,
    pub forward_from_sfr: u64,
    pub forward_from_sfr_and_cache: u64,
    pub dependency_predicted_alias_unresolved: u64,
    pub dependency_stq_address_match: u64,
    pub dependency_independent: u64,
    pub hit_l1: u64,
}

/// Store pipeline behavior.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub issue_complete: u64,
    pub issue_exception: u64,
    pub issue_unaligned: u64,
    pub issue_ordering: u64,
    pub issue_replay_sfr_not_ready: u64,
    pub issue_replay_data_not_ready: u64,
    pub forward_from_zero: u64,
    pub forward_from_sfr: u64,
}

/// Branch predictor outcomes observed by the core.
#[derive(Clone, Debug, Default)]
pub struct BranchStats {
    pub predictions: u64,
    pub updates: u64,
    pub cond_correct: u64,
    pub cond_mispred: u64,
    pub indir_correct: u64,
    pub indir_mispred: u64,
    pub return_correct: u64,
    pub return_mispred: u64,
    pub total_correct: u64,
    pub total_mispred: u64,
}

/// Commit results; totals 100% of commit attempts.
#[derive(Clone, Debug, Default)]
pub struct CommitStats {
    pub result_none: u64,
    pub result_ok: u64,
    pub result_exception: u64,
    pub result_exception_skipblock: u64,
    pub result_barrier: u64,
    pub result_stop: u64,
    pub freereg_pending: u64,
    pub freereg_free: u64,
    pub freereg_recycled: u64,
    pub flags_set: u64,
    pub flags_unset: u64,
    pub width: WidthHistogram,
    pub opclass: [u64; OPCLASS_COUNT],
}

/// All core statistics.
#[derive(Clone, Debug, Default)]
pub struct CoreStats {
    /// Simulated cycles.
    pub cycles: u64,
    /// Uops committed.
    pub uops_committed: u64,
    /// Macro-ops (x86 instructions) committed.
    pub macro_ops_committed: u64,
    /// Annulment events (mispredicts, aliasing, unaligned replays).
    pub annuls: u64,
    /// Uops flushed by annulment.
    pub uops_annulled: u64,

    pub fetch: FetchStats,
    pub frontend: FrontendStats,
    pub dispatch: DispatchStats,
    pub issue: IssueStats,
    pub load: LoadStats,
    pub store: StoreStats,
    pub branch: BranchStats,
    pub commit: CommitStats,
    /// Per-cluster writeback width histograms.
    pub writeback_width: Vec<WidthHistogram>,
}

/// Section names accepted by `print_sections`.
pub const STATS_SECTIONS: &[&str] = &[
    "summary", "fetch", "frontend", "dispatch", "issue", "memory", "branch", "commit",
];

impl CoreStats {
    /// Creates a stats block sized for the given widths and cluster count.
    pub fn new(
        fetch_width: usize,
        frontend_width: usize,
        dispatch_width: usize,
        commit_width: usize,
        writeback_width: usize,
        clusters: usize,
        max_issue_width: usize,
    ) -> Self {
        let mut stats = CoreStats::default();
        stats.fetch.width = vec![0; fetch_width + 1];
        stats.frontend.width = vec![0; frontend_width + 1];
        stats.dispatch.width = vec![0; dispatch_width + 1];
        stats.commit.width = vec![0; commit_width + 1];
        stats.issue.width = vec![vec![0; max_issue_width + 1]; clusters];
        stats.writeback_width = vec![vec![0; writeback_width + 1]; clusters];
        stats
    }

    fn print_histogram(name: &str, histogram: &[u64]) {
        print!("  {:<22} ", name);
        for (i, value) in histogram.iter().enumerate() {
            print!("{}:{} ", i, value);
        }
        println!();
    }

    /// Prints only the requested sections; an empty slice prints all.
    pub fn print_sections(&self, sections: &[String], cluster_names: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let cycles = self.cycles.max(1);

        if want("summary") {
            println!("==========================================================");
            println!("OUT-OF-ORDER CORE SIMULATION STATISTICS");
            println!("==========================================================");
            println!("sim_cycles               {}", self.cycles);
            println!("uops_committed           {}", self.uops_committed);
            println!("macro_ops_committed      {}", self.macro_ops_committed);
            println!(
                "uops_per_cycle           {:.4}",
                self.uops_committed as f64 / cycles as f64
            );
            println!(
                "macro_ops_per_cycle      {:.4}",
                self.macro_ops_committed as f64 / cycles as f64
            );
            println!("annul_events             {}", self.annuls);
            println!("uops_annulled            {}", self.uops_annulled);
            println!("----------------------------------------------------------");
        }
        if want("fetch") {
            let f = &self.fetch;
            println!("FETCH");
            println!("  stop.icache_miss       {}", f.stop_icache_miss);
            println!("  stop.fetchq_full       {}", f.stop_fetchq_full);
            println!("  stop.bogus_rip         {}", f.stop_bogus_rip);
            println!("  stop.branch_taken      {}", f.stop_branch_taken);
            println!("  stop.full_width        {}", f.stop_full_width);
            println!("  uops_fetched           {}", f.uops_fetched);
            println!("  insns_fetched          {}", f.user_insns_fetched);
            Self::print_histogram("width", &f.width);
            println!("----------------------------------------------------------");
        }
        if want("frontend") {
            let f = &self.frontend;
            println!("RENAME");
            println!("  status.complete        {}", f.status_complete);
            println!("  status.fetchq_empty    {}", f.status_fetchq_empty);
            println!("  status.rob_full        {}", f.status_rob_full);
            println!("  status.physregs_full   {}", f.status_physregs_full);
            println!("  status.ldq_full        {}", f.status_ldq_full);
            println!("  status.stq_full        {}", f.status_stq_full);
            println!("  status.lsq_full        {}", f.status_lsq_full);
            println!("  renamed.none           {}", f.renamed_none);
            println!("  renamed.reg            {}", f.renamed_reg);
            println!("  renamed.flags          {}", f.renamed_flags);
            println!("  renamed.reg_and_flags  {}", f.renamed_reg_and_flags);
            Self::print_histogram("width", &f.width);
            println!("----------------------------------------------------------");
        }
        if want("dispatch") {
            let d = &self.dispatch;
            println!("DISPATCH");
            for (i, name) in cluster_names.iter().enumerate() {
                println!("  cluster.{:<14} {}", name, d.cluster[i]);
            }
            println!("  cluster.none_avail     {}", d.cluster_none_avail);
            Self::print_histogram("width", &d.width);
            println!("----------------------------------------------------------");
        }
        if want("issue") {
            let i = &self.issue;
            println!("ISSUE");
            println!("  result.no_fu           {}", i.result_no_fu);
            println!("  result.replay          {}", i.result_replay);
            println!("  result.misspeculation  {}", i.result_misspeculation);
            println!("  result.mispredict      {}", i.result_branch_mispredict);
            println!("  result.exception       {}", i.result_exception);
            println!("  result.complete        {}", i.result_complete);
            for (c, name) in cluster_names.iter().enumerate() {
                Self::print_histogram(&format!("width.{}", name), &i.width[c]);
            }
            println!("----------------------------------------------------------");
        }
        if want("memory") {
            let l = &self.load;
            let s = &self.store;
            println!("LOADS");
            println!("  complete               {}", l.issue_complete);
            println!("  l1_miss                {}", l.issue_miss);
            println!("  exception              {}", l.issue_exception);
            println!("  unaligned              {}", l.issue_unaligned);
            println!("  fwd.cache              {}", l.forward_from_cache);
            println!("  fwd.sfr                {}", l.forward_from_sfr);
            println!("  fwd.sfr_and_cache      {}", l.forward_from_sfr_and_cache);
            println!("  dep.alias_predicted    {}", l.dependency_predicted_alias_unresolved);
            println!("  dep.stq_match          {}", l.dependency_stq_address_match);
            println!("  dep.independent        {}", l.dependency_independent);
            println!("  replay.sfr_addr        {}", l.issue_replay_sfr_addr_not_ready);
            println!("  replay.sfr_data        {}", l.issue_replay_sfr_data_not_ready);
            println!("  replay.missbuf_full    {}", l.issue_replay_missbuf_full);
            println!("STORES");
            println!("  complete               {}", s.issue_complete);
            println!("  exception              {}", s.issue_exception);
            println!("  unaligned              {}", s.issue_unaligned);
            println!("  aliasing               {}", s.issue_ordering);
            println!("  replay.sfr             {}", s.issue_replay_sfr_not_ready);
            println!("  replay.data            {}", s.issue_replay_data_not_ready);
            println!("  fwd.from_zero          {}", s.forward_from_zero);
            println!("  fwd.from_sfr           {}", s.forward_from_sfr);
            println!("----------------------------------------------------------");
        }
        if want("branch") {
            let b = &self.branch;
            let total = b.total_correct + b.total_mispred;
            let accuracy = if total > 0 {
                100.0 * b.total_correct as f64 / total as f64
            } else {
                0.0
            };
            println!("BRANCH PREDICTION");
            println!("  predictions            {}", b.predictions);
            println!("  updates                {}", b.updates);
            println!("  cond.correct           {}", b.cond_correct);
            println!("  cond.mispred           {}", b.cond_mispred);
            println!("  indirect.correct       {}", b.indir_correct);
            println!("  indirect.mispred       {}", b.indir_mispred);
            println!("  return.correct         {}", b.return_correct);
            println!("  return.mispred         {}", b.return_mispred);
            println!("  accuracy               {:.2}%", accuracy);
            println!("----------------------------------------------------------");
        }
        if want("commit") {
            let c = &self.commit;
            println!("COMMIT");
            println!("  result.none            {}", c.result_none);
            println!("  result.ok              {}", c.result_ok);
            println!("  result.exception       {}", c.result_exception);
            println!("  result.skipblock       {}", c.result_exception_skipblock);
            println!("  result.barrier         {}", c.result_barrier);
            println!("  result.stop            {}", c.result_stop);
            println!("  freereg.pending        {}", c.freereg_pending);
            println!("  freereg.free           {}", c.freereg_free);
            println!("  freereg.recycled       {}", c.freereg_recycled);
            println!("  flags.set              {}", c.flags_set);
            println!("  flags.unset            {}", c.flags_unset);
            Self::print_histogram("width", &c.width);
            for (cl, name) in cluster_names.iter().enumerate() {
                Self::print_histogram(&format!("writeback.{}", name), &self.writeback_width[cl]);
            }
        }
        println!("==========================================================");
    }

    /// Prints every section.
    pub fn print(&self, cluster_names: &[String]) {
        self.print_sections(&[], cluster_names);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_sizing() {
        let stats = CoreStats::new(4, 4, 4, 4, 4, 2, 3);
        assert_eq!(stats.fetch.width.len(), 5);
        assert_eq!(stats.issue.width.len(), 2);
        assert_eq!(stats.issue.width[0].len(), 4);
        assert_eq!(stats.writeback_width[1].len(), 5);
    }

    #[test]
    fn test_print_does_not_panic_on_empty() {
        let stats = CoreStats::new(1, 1, 1, 1, 1, 1, 1);
        stats.print_sections(&["summary".to_string()], &["int0".to_string()]);
    }
}
