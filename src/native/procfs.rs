use std::collections::HashMap;

/// The subset of `/proc/<pid>/stat` the sampler needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub ppid: u32,
    /// utime + stime, in clock ticks.
    pub cpu_ticks: u64,
    pub rss_pages: u64,
}

/// Parses one `stat` line. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
pub fn parse_stat(pid: u32, raw: &str) -> Option<ProcStat> {
    let rest = &raw[raw.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // fields[0] is field 3 (state) of proc(5)
    let ppid = fields.get(1)?.parse().ok()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let rss: i64 = fields.get(21)?.parse().ok()?;

    Some(ProcStat {
        pid,
        ppid,
        cpu_ticks: utime + stime,
        rss_pages: rss.max(0) as u64,
    })
}

#[cfg(target_os = "linux")]
pub fn read_stat(pid: u32) -> Option<ProcStat> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat(pid, &raw)
}

#[cfg(not(target_os = "linux"))]
pub fn read_stat(_pid: u32) -> Option<ProcStat> {
    None
}

#[cfg(target_os = "linux")]
fn all_stats() -> Vec<ProcStat> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        // processes exit between read_dir and read, those are skipped
        .filter_map(read_stat)
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn all_stats() -> Vec<ProcStat> {
    Vec::new()
}

/// Returns `root` and every process whose parent chain leads to it.
pub fn process_tree(root: u32) -> Vec<ProcStat> {
    collect_tree(root, all_stats())
}

/// Pids of all descendants of `root`, without `root` itself.
pub fn descendants(root: u32) -> Vec<u32> {
    process_tree(root)
        .into_iter()
        .map(|stat| stat.pid)
        .filter(|pid| *pid != root)
        .collect()
}

fn collect_tree(root: u32, stats: Vec<ProcStat>) -> Vec<ProcStat> {
    let mut children: HashMap<u32, Vec<ProcStat>> = HashMap::new();
    let mut root_stat = None;
    for stat in stats {
        if stat.pid == root {
            root_stat = Some(stat);
        } else {
            children.entry(stat.ppid).or_default().push(stat);
        }
    }

    let Some(root_stat) = root_stat else {
        return Vec::new();
    };

    let mut tree = vec![root_stat];
    let mut cursor = 0;
    while cursor < tree.len() {
        let pid = tree[cursor].pid;
        if let Some(kids) = children.remove(&pid) {
            tree.extend(kids);
        }
        cursor += 1;
    }
    tree
}

pub fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}

pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}
