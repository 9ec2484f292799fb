//! In-memory `Executor` for engine tests.
//!
//! Interprets the subset of `zfs`/`zpool` grammar the engine issues against a
//! tiny simulated store and records every invocation.

use crate::system::classify_cli_error;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Mutex;
use vstore_core::error::{StoreError, StoreResult};
use vstore_core::executor::{Executor, Output, Tool};
use vstore_core::model::DatasetKind;
use vstore_core::props::Properties;

#[derive(Default)]
struct State {
    datasets: BTreeMap<String, (DatasetKind, Properties)>,
    bookmarks: BTreeSet<String>,
    pools: BTreeMap<String, Properties>,
    calls: Vec<(Tool, Vec<String>)>,
    failures: BTreeMap<String, String>,
    interrupt: bool,
    received: usize,
    diff_output: String,
    latency: BTreeMap<String, (u64, u64)>,
    scrubbing: BTreeSet<String>,
    next_guid: u64,
}

#[derive(Default)]
pub(crate) struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_dataset(&self, name: &str, kind: DatasetKind, props: &[(&str, &str)]) {
        let props = props
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state().datasets.insert(name.to_string(), (kind, props));
    }

    pub(crate) fn add_bookmark(&self, name: &str) {
        self.state().bookmarks.insert(name.to_string());
    }

    pub(crate) fn add_pool(&self, name: &str, guid: &str) {
        let mut props = Properties::new();
        props.insert("guid".into(), guid.into());
        props.insert("health".into(), "ONLINE".into());
        props.insert("size".into(), "1000".into());
        self.state().pools.insert(name.to_string(), props);
    }

    pub(crate) fn calls(&self) -> Vec<(Tool, Vec<String>)> {
        self.state().calls.clone()
    }

    pub(crate) fn last_call(&self) -> (Tool, Vec<String>) {
        self.state().calls.last().cloned().unwrap()
    }

    /// Argument vectors of every call whose verb is `verb`.
    pub(crate) fn calls_for(&self, verb: &str) -> Vec<Vec<String>> {
        self.state()
            .calls
            .iter()
            .filter(|(_, args)| args.first().map(String::as_str) == Some(verb))
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Make the next `verb` call exit 1 with `stderr`.
    pub(crate) fn fail_next(&self, verb: &str, stderr: &str) {
        self.state().failures.insert(verb.into(), stderr.into());
    }

    pub(crate) fn interrupt_stream(&self) {
        self.state().interrupt = true;
    }

    /// Bytes consumed by the last receive.
    pub(crate) fn received(&self) -> usize {
        self.state().received
    }

    pub(crate) fn set_diff_output(&self, output: &str) {
        self.state().diff_output = output.to_string();
    }

    pub(crate) fn set_latency(&self, pool: &str, read_ns: u64, write_ns: u64) {
        self.state().latency.insert(pool.into(), (read_ns, write_ns));
    }
}

fn fail(tool: Tool, args: &[&str], stderr: String) -> StoreError {
    let command = format!("{} {}", tool, args.join(" "));
    let output = Output {
        stdout: String::new(),
        stderr,
        status: 1,
    };
    classify_cli_error(&command, args, &output)
}

/// Split flags (and their values) from positional tokens.
fn split_args<'a>(args: &[&'a str], valued: &[&str]) -> (Vec<(&'a str, &'a str)>, Vec<&'a str>) {
    let mut flags = Vec::new();
    let mut positional = Vec::new();
    let mut iter = args.iter().copied();
    while let Some(arg) = iter.next() {
        if valued.contains(&arg) {
            flags.push((arg, iter.next().unwrap_or_default()));
        } else if arg.starts_with('-') && arg.len() > 1 {
            flags.push((arg, ""));
        } else {
            positional.push(arg);
        }
    }
    (flags, positional)
}

fn has(flags: &[(&str, &str)], flag: &str) -> bool {
    flags.iter().any(|(f, _)| *f == flag)
}

fn option_pairs(flags: &[(&str, &str)]) -> Properties {
    flags
        .iter()
        .filter(|(f, _)| *f == "-o")
        .filter_map(|(_, kv)| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn is_within(name: &str, root: &str) -> bool {
    name == root
        || name.starts_with(&format!("{root}/"))
        || name.starts_with(&format!("{root}@"))
}

fn missing_dataset(name: &str) -> String {
    format!("cannot open '{name}': dataset does not exist")
}

impl State {
    /// `zfs get -H -p -o name,property,value` rows, sorted by name.
    fn property_rows(&self, keep: impl Fn(&str, &str) -> bool) -> String {
        let mut entities: Vec<(&str, &str, Option<&Properties>)> = self
            .datasets
            .iter()
            .map(|(name, (kind, props))| (name.as_str(), kind.as_str(), Some(props)))
            .chain(self.bookmarks.iter().map(|name| (name.as_str(), "bookmark", None)))
            .filter(|(name, kind, _)| keep(name, kind))
            .collect();
        entities.sort_by_key(|(name, _, _)| *name);
        let mut out = String::new();
        for (name, kind, props) in entities {
            out.push_str(&format!("{name}\ttype\t{kind}\n"));
            for (key, value) in props.into_iter().flatten() {
                out.push_str(&format!("{name}\t{key}\t{value}\n"));
            }
        }
        out
    }

    fn zfs(
        &mut self,
        args: &[&str],
        input: Option<&mut (dyn Read + Send)>,
    ) -> Result<String, String> {
        let verb = args.first().copied().unwrap_or_default();
        let rest = &args[1.min(args.len())..];
        match verb {
            "get" => {
                let (flags, positional) = split_args(rest, &["-o", "-t"]);
                let types = flags.iter().find(|(f, _)| *f == "-t").map(|(_, v)| *v);
                let recursive = has(&flags, "-r");
                // positional[0] is the property list ("all")
                let root = positional.get(1).copied();
                if let Some(root) = root {
                    if !self.datasets.contains_key(root) && !self.bookmarks.contains(root) {
                        return Err(missing_dataset(root));
                    }
                }
                Ok(self.property_rows(|name, kind| {
                    let kind_ok =
                        types.map_or(true, |t| t.split(',').any(|w| w == "all" || w == kind));
                    let name_ok = match root {
                        Some(root) if recursive => {
                            is_within(name, root) || name.starts_with(&format!("{root}#"))
                        }
                        Some(root) => name == root,
                        None => true,
                    };
                    kind_ok && name_ok
                }))
            }
            "create" => {
                let (flags, positional) = split_args(rest, &["-o", "-V"]);
                let name = positional.last().copied().unwrap_or_default();
                if self.datasets.contains_key(name) {
                    return Err(format!("cannot create '{name}': dataset already exists"));
                }
                let mut props = option_pairs(&flags);
                let kind = match flags.iter().find(|(f, _)| *f == "-V") {
                    Some((_, size)) => {
                        props.insert("volsize".into(), size.to_string());
                        DatasetKind::Volume
                    }
                    None => DatasetKind::Filesystem,
                };
                self.datasets.insert(name.to_string(), (kind, props));
                Ok(String::new())
            }
            "set" => {
                let name = rest.last().copied().unwrap_or_default();
                let Some((_, props)) = self.datasets.get_mut(name) else {
                    return Err(missing_dataset(name));
                };
                for pair in &rest[..rest.len().saturating_sub(1)] {
                    if let Some((k, v)) = pair.split_once('=') {
                        props.insert(k.to_string(), v.to_string());
                    }
                }
                Ok(String::new())
            }
            "receive" => {
                let (flags, positional) = split_args(rest, &[]);
                let name = positional.last().copied().unwrap_or_default();
                let mut buf = Vec::new();
                if let Some(input) = input {
                    let _ = input.read_to_end(&mut buf);
                }
                self.received = buf.len();
                if self.datasets.contains_key(name) && !has(&flags, "-F") {
                    return Err(format!(
                        "cannot receive new filesystem stream: destination '{name}' exists\nmust specify -F to overwrite it"
                    ));
                }
                self.datasets
                    .entry(name.to_string())
                    .or_insert((DatasetKind::Filesystem, Properties::new()));
                Ok(String::new())
            }
            "snapshot" => {
                let (flags, positional) = split_args(rest, &[]);
                let full = positional.last().copied().unwrap_or_default();
                let (base, snap) = full.split_once('@').unwrap_or((full, ""));
                if !self.datasets.contains_key(base) {
                    return Err(missing_dataset(base));
                }
                let targets: Vec<String> = if has(&flags, "-r") {
                    self.datasets
                        .iter()
                        .filter(|(n, (k, _))| *k != DatasetKind::Snapshot && is_within(n, base))
                        .map(|(n, _)| n.clone())
                        .collect()
                } else {
                    vec![base.to_string()]
                };
                for target in targets {
                    self.datasets.insert(
                        format!("{target}@{snap}"),
                        (DatasetKind::Snapshot, Properties::new()),
                    );
                }
                Ok(String::new())
            }
            "destroy" => {
                let (flags, positional) = split_args(rest, &[]);
                let name = positional.last().copied().unwrap_or_default();
                if !self.datasets.contains_key(name) {
                    return Err(missing_dataset(name));
                }
                if has(&flags, "-r") || has(&flags, "-R") {
                    self.datasets.retain(|n, _| !is_within(n, name));
                } else {
                    self.datasets.remove(name);
                }
                Ok(String::new())
            }
            "diff" => Ok(self.diff_output.clone()),
            other => Err(format!("unrecognized command '{other}'")),
        }
    }

    fn zpool(&mut self, args: &[&str]) -> Result<String, String> {
        let verb = args.first().copied().unwrap_or_default();
        let rest = &args[1.min(args.len())..];
        let missing_pool = |name: &str| format!("cannot open '{name}': no such pool");
        match verb {
            "list" => Ok(self
                .pools
                .keys()
                .map(|name| format!("{name}\n"))
                .collect()),
            "get" => {
                let name = rest.last().copied().unwrap_or_default();
                let props = self.pools.get(name).ok_or_else(|| missing_pool(name))?;
                Ok(props
                    .iter()
                    .map(|(k, v)| format!("{name}\t{k}\t{v}\t-\n"))
                    .collect())
            }
            "create" => {
                let (flags, positional) = split_args(rest, &["-o"]);
                let name = positional.first().copied().unwrap_or_default();
                if self.pools.contains_key(name) {
                    return Err(format!("cannot create '{name}': pool already exists"));
                }
                self.next_guid += 1;
                let mut props = option_pairs(&flags);
                props.insert("guid".into(), format!("9000{}", self.next_guid));
                props.insert("health".into(), "ONLINE".into());
                self.pools.insert(name.to_string(), props);
                Ok(String::new())
            }
            "destroy" => {
                let name = rest.last().copied().unwrap_or_default();
                self.pools.remove(name).ok_or_else(|| missing_pool(name))?;
                Ok(String::new())
            }
            "replace" => {
                let name = rest.first().copied().unwrap_or_default();
                if !self.pools.contains_key(name) {
                    return Err(missing_pool(name));
                }
                Ok(String::new())
            }
            "scrub" => {
                let name = rest.last().copied().unwrap_or_default();
                if !self.pools.contains_key(name) {
                    return Err(missing_pool(name));
                }
                self.scrubbing.insert(name.to_string());
                Ok(String::new())
            }
            "status" => {
                let name = rest.last().copied().unwrap_or_default();
                let props = self.pools.get(name).ok_or_else(|| missing_pool(name))?;
                let health = props.get("health").cloned().unwrap_or_default();
                let scan = if self.scrubbing.contains(name) {
                    "scrub in progress since Sun Oct 19 10:00:00 2026"
                } else {
                    "none requested"
                };
                Ok(format!(
                    "  pool: {name}\n state: {health}\n  scan: {scan}\nconfig:\n\n\tNAME        STATE     READ WRITE CKSUM\n\t{name}        {health}       0     0     0\n\t  sda       ONLINE       0     0     0\n\nerrors: No known data errors\n"
                ))
            }
            "set" => {
                let name = rest.last().copied().unwrap_or_default();
                let pair = rest.first().copied().unwrap_or_default();
                let props = self.pools.get_mut(name).ok_or_else(|| missing_pool(name))?;
                if let Some((k, v)) = pair.split_once('=') {
                    props.insert(k.to_string(), v.to_string());
                }
                Ok(String::new())
            }
            "iostat" => {
                let (_, positional) = split_args(rest, &[]);
                let name = positional.first().copied().unwrap_or_default();
                if !self.pools.contains_key(name) {
                    return Err(missing_pool(name));
                }
                let (read, write) = match self.latency.get(name) {
                    Some((r, w)) => (r.to_string(), w.to_string()),
                    None => ("-".to_string(), "-".to_string()),
                };
                Ok(format!(
                    "{name}\t100\t900\t0\t0\t0\t0\t{read}\t{write}\t-\t-\t-\t-\t-\t-\t-\t-\n"
                ))
            }
            other => Err(format!("unrecognized command '{other}'")),
        }
    }
}

impl Executor for FakeStore {
    fn run(
        &self,
        tool: Tool,
        args: &[&str],
        input: Option<&mut (dyn Read + Send)>,
    ) -> StoreResult<Output> {
        let mut state = self.state();
        state
            .calls
            .push((tool, args.iter().map(|a| a.to_string()).collect()));

        let verb = args.first().copied().unwrap_or_default();
        if let Some(stderr) = state.failures.remove(verb) {
            return Err(fail(tool, args, stderr));
        }
        if verb == "receive" && state.interrupt {
            state.interrupt = false;
            return Err(StoreError::PartialStream {
                dataset: format!("{} {}", tool, args.join(" ")),
                reason: "connection reset by peer".into(),
            });
        }

        let result = match tool {
            Tool::Zfs => state.zfs(args, input),
            Tool::Zpool => state.zpool(args),
        };
        result
            .map(Output::success)
            .map_err(|stderr| fail(tool, args, stderr))
    }
}
