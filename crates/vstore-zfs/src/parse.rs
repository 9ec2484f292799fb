//! Helpers for turning `zfs` and `zpool` output into typed records.
//!
//! Property sets are taken from the output itself, so properties a newer store
//! adds simply show up in the maps instead of breaking the parse.

use log::debug;
use regex::Regex;
use std::sync::OnceLock;
use vstore_core::error::{StoreError, StoreResult};
use vstore_core::model::{
    ChangeType, Dataset, DatasetKind, InodeChange, InodeType, PoolHealth, ScanState, VdevStatus,
    Zpool, ZpoolStatus,
};
use vstore_core::props::Properties;

/// Split `-H` output into rows of tab-separated cells.
pub(crate) fn rows(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.trim_end_matches('\r')
                .split('\t')
                .map(|cell| cell.trim().to_string())
                .collect()
        })
        .collect()
}

/// Datasets from `zfs get -H -p -o name,property,value all` output.
///
/// Rows arrive grouped by dataset. Names and values are taken verbatim
/// between tabs, so embedded spaces survive. Types outside `DatasetKind`
/// (bookmarks, anything newer) are skipped.
pub(crate) fn datasets_from_get(output: &str) -> StoreResult<Vec<Dataset>> {
    let mut grouped: Vec<(String, Properties)> = Vec::new();
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let mut cells = line.trim_end_matches('\r').splitn(3, '\t');
        let (Some(name), Some(property), Some(value)) = (cells.next(), cells.next(), cells.next())
        else {
            return Err(StoreError::Parse(format!("malformed zfs get row `{line}`")));
        };
        if grouped.last().map_or(true, |(last, _)| last != name) {
            grouped.push((name.to_string(), Properties::new()));
        }
        if let Some((_, props)) = grouped.last_mut() {
            props.insert(property.to_string(), value.to_string());
        }
    }

    let mut datasets = Vec::with_capacity(grouped.len());
    for (name, props) in grouped {
        if let Some(dataset) = dataset_from_properties(name, props)? {
            datasets.push(dataset);
        }
    }
    Ok(datasets)
}

fn dataset_from_properties(name: String, mut props: Properties) -> StoreResult<Option<Dataset>> {
    let kind = props
        .get("type")
        .ok_or_else(|| StoreError::Parse(format!("dataset {name} reported no type")))?;
    let kind = match kind.parse::<DatasetKind>() {
        Ok(kind) => kind,
        Err(_) => {
            debug!("skipping {} of unmodelled type {}", name, kind);
            return Ok(None);
        }
    };
    props.insert("name".to_string(), name.clone());
    Ok(Some(Dataset {
        name,
        kind,
        properties: props,
    }))
}

/// Properties of `pool` from `zpool get -H -p all` rows (`name property value source`).
pub(crate) fn pool_properties(output: &str, pool: &str) -> StoreResult<Properties> {
    let props: Properties = rows(output)
        .into_iter()
        .filter(|row| row.len() >= 3 && row[0] == pool)
        .map(|row| (row[1].clone(), row[2].clone()))
        .collect();
    if props.is_empty() {
        return Err(StoreError::Parse(format!(
            "zpool get returned no properties for {pool}"
        )));
    }
    Ok(props)
}

pub(crate) fn zpool_from_properties(name: &str, mut props: Properties) -> StoreResult<Zpool> {
    let guid = props
        .get("guid")
        .cloned()
        .ok_or_else(|| StoreError::Parse(format!("pool {name} reported no guid")))?;
    let health = PoolHealth::parse(props.get("health").map(String::as_str).unwrap_or("-"));
    props.insert("name".to_string(), name.to_string());
    Ok(Zpool {
        name: name.to_string(),
        guid,
        health,
        properties: props,
    })
}

/// Pool names from `zpool list -H -o name`.
pub(crate) fn pool_names(output: &str) -> Vec<String> {
    rows(output)
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .collect()
}

fn section_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(pool|id|state|status|action|see|scan|remove|config|errors):\s?(.*)$")
            .expect("static regex")
    })
}

/// Parse `zpool status` output for a single pool.
pub(crate) fn zpool_status(output: &str) -> StoreResult<ZpoolStatus> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut devices = Vec::new();
    let mut in_config = false;

    for line in output.lines() {
        if let Some(caps) = section_header().captures(line) {
            let key = caps[1].to_string();
            in_config = key == "config";
            sections.push((key, caps[2].trim().to_string()));
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        if in_config {
            if let Some(device) = vdev_line(line) {
                devices.push(device);
            }
            continue;
        }
        // continuation of the previous section
        if let Some((_, value)) = sections.last_mut() {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(line.trim());
        }
    }

    let section = |key: &str| {
        sections
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    };

    let name = section("pool")
        .ok_or_else(|| StoreError::Parse("zpool status output has no pool: line".into()))?;
    let state = PoolHealth::parse(&section("state").unwrap_or_default());
    let scan = section("scan");
    let scan_state = scan_state(scan.as_deref());

    Ok(ZpoolStatus {
        name,
        state,
        status: section("status"),
        action: section("action"),
        scan,
        scan_state,
        errors: section("errors"),
        devices,
    })
}

/// One device row of the config block; the column header row is skipped.
fn vdev_line(line: &str) -> Option<VdevStatus> {
    let body = line.strip_prefix('\t').unwrap_or(line);
    let indent = body.len() - body.trim_start_matches(' ').len();
    let mut fields = body.split_whitespace();
    let name = fields.next()?.to_string();
    if name == "NAME" {
        return None;
    }
    let state = fields.next().unwrap_or_default().to_string();
    let mut counter = || fields.next().and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    let read_errors = counter();
    let write_errors = counter();
    let checksum_errors = counter();
    let note = fields.collect::<Vec<_>>().join(" ");
    Some(VdevStatus {
        name,
        state,
        read_errors,
        write_errors,
        checksum_errors,
        depth: indent / 2,
        note: (!note.is_empty()).then_some(note),
    })
}

pub(crate) fn scan_state(scan: Option<&str>) -> ScanState {
    let Some(scan) = scan else {
        return ScanState::None;
    };
    let lower = scan.to_ascii_lowercase();
    if lower.starts_with("none requested") {
        ScanState::None
    } else if lower.contains("scrub in progress") {
        ScanState::ScrubInProgress
    } else if lower.contains("scrub paused") {
        ScanState::ScrubPaused
    } else if lower.contains("scrub canceled") {
        ScanState::ScrubCanceled
    } else if lower.contains("scrub repaired") {
        ScanState::ScrubFinished
    } else if lower.contains("resilver in progress") {
        ScanState::ResilverInProgress
    } else if lower.starts_with("resilvered") {
        ScanState::ResilverFinished
    } else {
        ScanState::Other(scan.to_string())
    }
}

/// Latency from `zpool iostat -H -p -l -y <pool> 1 1`, in milliseconds.
///
/// Mean of the total_wait read and write columns (nanoseconds; `-` counts as 0).
pub(crate) fn pool_io_delay(output: &str, pool: &str) -> StoreResult<f64> {
    const TOTAL_WAIT_READ: usize = 7;
    const TOTAL_WAIT_WRITE: usize = 8;

    let row = rows(output)
        .into_iter()
        .find(|row| row.first().map(String::as_str) == Some(pool))
        .ok_or_else(|| StoreError::Parse(format!("zpool iostat reported nothing for {pool}")))?;
    if row.len() <= TOTAL_WAIT_WRITE {
        return Err(StoreError::Parse(format!(
            "zpool iostat row for {pool} has {} columns, expected latency columns",
            row.len()
        )));
    }
    let wait = |idx: usize| -> StoreResult<f64> {
        match row[idx].as_str() {
            "-" | "" => Ok(0.0),
            v => v.parse::<f64>().map_err(|_| {
                StoreError::Parse(format!("non-numeric latency `{v}` for {pool}"))
            }),
        }
    };
    let nanos = (wait(TOTAL_WAIT_READ)? + wait(TOTAL_WAIT_WRITE)?) / 2.0;
    Ok(nanos / 1_000_000.0)
}

/// Records from `zfs diff -F -H`.
pub(crate) fn inode_changes(output: &str) -> StoreResult<Vec<InodeChange>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(inode_change)
        .collect()
}

fn inode_change(line: &str) -> StoreResult<InodeChange> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 3 {
        return Err(StoreError::Parse(format!("malformed diff line `{line}`")));
    }
    let change = ChangeType::from_marker(fields[0])
        .ok_or_else(|| StoreError::Parse(format!("unknown change marker `{}`", fields[0])))?;
    let kind = InodeType::from_marker(fields[1])
        .ok_or_else(|| StoreError::Parse(format!("unknown inode marker `{}`", fields[1])))?;
    let (path, reference_count_change) = split_refcount(fields[2]);
    let new_path = fields
        .get(3)
        .filter(|p| !p.is_empty())
        .map(|p| unescape_path(p));
    Ok(InodeChange {
        change,
        kind,
        path: unescape_path(path),
        new_path,
        reference_count_change,
    })
}

/// Peel a trailing ` (+N)` / ` (-N)` link-count delta off a path.
fn split_refcount(path: &str) -> (&str, i64) {
    if let Some(stripped) = path.strip_suffix(')') {
        if let Some((head, delta)) = stripped.rsplit_once(" (") {
            if let Ok(delta) = delta.parse::<i64>() {
                return (head, delta);
            }
        }
    }
    (path, 0)
}

/// Undo the `\NNNN` octal escaping `zfs diff` applies to unusual bytes.
fn unescape_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 5 <= bytes.len() {
            let digits = &bytes[i + 1..i + 5];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 5;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET: &str = "\
tank\ttype\tfilesystem
tank\tused\t24576
tank\tavailable\t100000
tank\tmountpoint\t/tank
tank\tquota\t0
tank/vm1\ttype\tvolume
tank/vm1\tvolsize\t10737418240
tank/vm1\tmountpoint\t-
tank@base\ttype\tsnapshot
tank@base\tused\t0
";

    #[test]
    fn rows_split_on_tabs_only() {
        assert_eq!(
            rows("a\tb c\t\n\nx   y\n"),
            vec![
                vec!["a".to_string(), "b c".to_string(), String::new()],
                vec!["x   y".to_string()]
            ]
        );
    }

    #[test]
    fn get_output_parses_exact_values() {
        let datasets = datasets_from_get(GET).unwrap();
        assert_eq!(datasets.len(), 3);
        assert_eq!(datasets[0].kind, DatasetKind::Filesystem);
        assert_eq!(datasets[0].property("mountpoint"), Some("/tank"));
        assert_eq!(datasets[0].property("name"), Some("tank"));
        assert_eq!(datasets[0].available_bytes(), Some(100_000));
        assert_eq!(datasets[1].name, "tank/vm1");
        assert_eq!(datasets[1].kind, DatasetKind::Volume);
        assert_eq!(datasets[1].size_bytes(), Some(10_737_418_240));
        assert_eq!(datasets[2].kind, DatasetKind::Snapshot);
    }

    #[test]
    fn names_and_values_keep_spaces() {
        let out = "tank/my vm\ttype\tfilesystem\ntank/my vm\tused\t24576\ntank/my vm\tmountpoint\t/tank/my vm\ntank/my vm\tcomment:note\t a b \n";
        let datasets = datasets_from_get(out).unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name, "tank/my vm");
        assert_eq!(datasets[0].property("mountpoint"), Some("/tank/my vm"));
        assert_eq!(datasets[0].used_bytes(), Some(24576));
        assert_eq!(datasets[0].property("comment:note"), Some(" a b "));
    }

    #[test]
    fn bookmarks_and_unknown_types_are_skipped() {
        let out = "tank\ttype\tfilesystem\ntank\tused\t24576\ntank#nightly\ttype\tbookmark\ntank#nightly\tguid\t42\ntank/x\ttype\thologram\ntank/vm0\ttype\tvolume\n";
        let datasets = datasets_from_get(out).unwrap();
        let names: Vec<_> = datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["tank", "tank/vm0"]);
    }

    #[test]
    fn unknown_properties_are_kept() {
        let out = "tank\ttype\tfilesystem\ntank\tshinynewprop\tsparkle\n";
        let datasets = datasets_from_get(out).unwrap();
        assert_eq!(datasets[0].property("shinynewprop"), Some("sparkle"));
    }

    #[test]
    fn dataset_without_type_is_parse_error() {
        let err = datasets_from_get("tank\tused\t1\n").unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
        let err = datasets_from_get("tank used 1\n").unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    #[test]
    fn empty_output_is_empty() {
        assert!(datasets_from_get("").unwrap().is_empty());
    }

    #[test]
    fn pool_properties_from_get() {
        let out = "tank\tsize\t1000\t-\ntank\tguid\t1234567890\t-\ntank\thealth\tONLINE\t-\ntank\tcomment\t\tdefault\n";
        let props = pool_properties(out, "tank").unwrap();
        assert_eq!(props["comment"], "");
        let pool = zpool_from_properties("tank", props).unwrap();
        assert_eq!(pool.guid, "1234567890");
        assert_eq!(pool.health, PoolHealth::Online);
        assert_eq!(pool.size_bytes(), Some(1000));
    }

    #[test]
    fn pool_without_guid_is_parse_error() {
        let err = zpool_from_properties("tank", Properties::new()).unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    const STATUS: &str = "  pool: tank
 state: DEGRADED
status: One or more devices could not be used because the label is missing or
\tinvalid.  Sufficient replicas exist for the pool to continue
\tfunctioning in a degraded state.
action: Replace the device using 'zpool replace'.
  scan: resilver in progress since Sun Oct 19 10:00:00 2026
\t1.50G scanned at 100M/s, 1.00G issued at 50M/s, 3.00G total
\t500M resilvered, 33.33% done, 00:00:40 to go
config:

\tNAME          STATE     READ WRITE CKSUM
\ttank          DEGRADED     0     0     0
\t  mirror-0    DEGRADED     0     0     0
\t    ada0      ONLINE       0     0     0
\t    ada1      UNAVAIL      3     1     0  cannot open

errors: No known data errors
";

    #[test]
    fn status_sections_and_devices() {
        let status = zpool_status(STATUS).unwrap();
        assert_eq!(status.name, "tank");
        assert_eq!(status.state, PoolHealth::Degraded);
        assert!(status
            .status
            .as_deref()
            .unwrap()
            .ends_with("functioning in a degraded state."));
        assert_eq!(status.scan_state, ScanState::ResilverInProgress);
        assert!(status.scan_in_progress());
        assert_eq!(status.errors.as_deref(), Some("No known data errors"));
        assert_eq!(status.devices.len(), 4);
        assert_eq!(status.devices[0].name, "tank");
        assert_eq!(status.devices[0].depth, 0);
        assert_eq!(status.devices[1].depth, 1);
        let ada1 = &status.devices[3];
        assert_eq!(ada1.depth, 2);
        assert_eq!(ada1.state, "UNAVAIL");
        assert_eq!((ada1.read_errors, ada1.write_errors), (3, 1));
        assert_eq!(ada1.note.as_deref(), Some("cannot open"));
    }

    #[test]
    fn status_without_pool_line_fails() {
        assert!(zpool_status("garbage\n").is_err());
    }

    #[test]
    fn scan_states() {
        assert_eq!(scan_state(None), ScanState::None);
        assert_eq!(scan_state(Some("none requested")), ScanState::None);
        assert_eq!(
            scan_state(Some("scrub repaired 0B in 00:00:01 with 0 errors on Sun Oct 19")),
            ScanState::ScrubFinished
        );
        assert_eq!(
            scan_state(Some("scrub in progress since Sun Oct 19")),
            ScanState::ScrubInProgress
        );
        assert_eq!(
            scan_state(Some("scrub canceled on Sun Oct 19")),
            ScanState::ScrubCanceled
        );
        assert_eq!(
            scan_state(Some("resilvered 1G in 00:01:00 with 0 errors")),
            ScanState::ResilverFinished
        );
    }

    #[test]
    fn io_delay_from_iostat() {
        let out = "tank\t1000\t2000\t5\t6\t100\t200\t2000000\t4000000\t1\t1\t-\t-\t-\t-\t-\t-\n";
        let delay = pool_io_delay(out, "tank").unwrap();
        assert!((delay - 3.0).abs() < 1e-9, "{delay}");

        let idle = "tank\t1000\t2000\t0\t0\t0\t0\t-\t-\t-\t-\n";
        assert_eq!(pool_io_delay(idle, "tank").unwrap(), 0.0);

        assert!(pool_io_delay(out, "other").is_err());
        assert!(pool_io_delay("tank\t1\t2\n", "tank").is_err());
    }

    #[test]
    fn diff_records() {
        let out = "M\t/\t/tank/home/ (+1)\n+\tF\t/tank/home/new\\0040file\nR\tF\t/tank/home/a\t/tank/home/b\n-\t@\t/tank/home/link\n";
        let changes = inode_changes(out).unwrap();
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[0].change, ChangeType::Modified);
        assert_eq!(changes[0].kind, InodeType::Directory);
        assert_eq!(changes[0].path, "/tank/home/");
        assert_eq!(changes[0].reference_count_change, 1);
        assert_eq!(changes[1].path, "/tank/home/new file");
        assert_eq!(changes[2].new_path.as_deref(), Some("/tank/home/b"));
        assert_eq!(changes[3].kind, InodeType::SymbolicLink);
        assert_eq!(changes[3].change, ChangeType::Removed);
    }

    #[test]
    fn diff_rejects_unknown_marker() {
        assert!(inode_changes("?\tF\t/x\n").is_err());
    }
}
