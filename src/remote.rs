use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use serde::{Deserialize, Serialize};

/// One mirror endpoint as the transfer tool names it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Remote {
    pub name: String,
}

impl Remote {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Priority-ordered snapshot of mirrors. Index 0 is tried first; failover only
/// ever moves forward.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct RemoteList {
    remotes: Vec<Remote>,
}

impl RemoteList {
    pub fn new(remotes: Vec<Remote>) -> Self {
        Self { remotes }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { remotes: names.into_iter().map(Remote::new).collect() }
    }

    /// Parse the output of the tool's `listremotes` command: one `name:` per
    /// line. Blank lines are skipped, and when `filter` is given only names
    /// containing it are kept. Order is preserved and duplicates dropped.
    pub fn from_listing(stdout: &str, filter: Option<&str>) -> Self {
        let mut remotes: Vec<Remote> = Vec::new();
        for line in stdout.lines() {
            let name = line.trim().trim_end_matches(':').trim();
            if name.is_empty() {
                continue;
            }
            if let Some(f) = filter
                && !name.contains(f)
            {
                continue;
            }
            if remotes.iter().any(|r| r.name == name) {
                continue;
            }
            remotes.push(Remote::new(name));
        }
        Self { remotes }
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    pub fn first(&self) -> Option<&Remote> {
        self.remotes.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Remote> {
        self.remotes.iter()
    }

    pub fn position(&self, remote: &Remote) -> Option<usize> {
        self.remotes.iter().position(|r| r == remote)
    }

    /// The remote after `current`, or `None` when `current` is the last one
    /// or not part of the list.
    pub fn next_after(&self, current: &Remote) -> Option<&Remote> {
        self.position(current).and_then(|i| self.remotes.get(i + 1))
    }

    pub fn show_table(&self) {
        if !self.is_empty() {
            let title = vec!["#".cell().bold(true), "Mirror".cell().bold(true)];
            let mut table: Vec<Vec<CellStruct>> = Vec::new();
            for (i, remote) in self.remotes.iter().enumerate() {
                table.push(vec![(i + 1).cell().justify(Justify::Right), remote.name.as_str().cell()]);
            }
            if let Err(e) = print_stdout(table.table().title(title)) {
                eprintln!("⚠️ failed to print table: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_keeps_order_and_strips_colons() {
        let list = RemoteList::from_listing("mirror-b:\nmirror-a:\n\n", None);
        let names: Vec<_> = list.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["mirror-b", "mirror-a"]);
    }

    #[test]
    fn listing_filter_and_dedup() {
        let list = RemoteList::from_listing("gdrive:\nVRP-mirror01:\nVRP-mirror02:\nVRP-mirror01:\n", Some("mirror"));
        assert_eq!(list.len(), 2);
        assert_eq!(list.first(), Some(&Remote::new("VRP-mirror01")));
    }

    #[test]
    fn next_after_never_wraps() {
        let list = RemoteList::from_names(["a", "b", "c"]);
        assert_eq!(list.next_after(&Remote::new("a")), Some(&Remote::new("b")));
        assert_eq!(list.next_after(&Remote::new("c")), None);
        assert_eq!(list.next_after(&Remote::new("zz")), None);
    }
}
