//! Bookmark file: groups of named stream URLs, edited by the bookmark editor
//! and flattened into the station list the playback engine consumes.
//!
//! On disk this is a JSON array:
//!
//! ```json
//! [{ "group": "Jazz", "stations": [{ "name": "TSF", "url": "http://..." }] }]
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::protocol::{Station, StationId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkEntry {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl BookmarkEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            id: None,
        }
    }

    fn station_id(&self) -> StationId {
        match &self.id {
            Some(id) => StationId(id.clone()),
            None => StationId::derived(&self.name, &self.url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkGroup {
    pub group: String,
    #[serde(default)]
    pub stations: Vec<BookmarkEntry>,
}

impl BookmarkGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            group: name.into(),
            stations: Vec::new(),
        }
    }
}

pub struct BookmarkStore {
    path: PathBuf,
    groups: Vec<BookmarkGroup>,
}

impl BookmarkStore {
    /// Read the bookmark file.  A missing file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if !path.exists() {
            warn!("Bookmark file {} not found, starting empty", path.display());
            return Ok(Self {
                path,
                groups: Vec::new(),
            });
        }
        let content = std::fs::read_to_string(&path)?;
        let groups: Vec<BookmarkGroup> = serde_json::from_str(&content)?;
        info!(
            "Loaded {} bookmark groups from {}",
            groups.len(),
            path.display()
        );
        Ok(Self { path, groups })
    }

    pub fn from_groups(path: impl Into<PathBuf>, groups: Vec<BookmarkGroup>) -> Self {
        Self {
            path: path.into(),
            groups,
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.groups)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn groups(&self) -> &[BookmarkGroup] {
        &self.groups
    }

    /// All stations in menu order, tagged with their group.
    pub fn stations(&self) -> Vec<Station> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.stations.iter().map(move |e| Station {
                    id: e.station_id(),
                    name: e.name.clone(),
                    url: e.url.clone(),
                    group: Some(g.group.clone()),
                })
            })
            .collect()
    }

    pub fn find(&self, id: &StationId) -> Option<Station> {
        self.stations().into_iter().find(|s| &s.id == id)
    }

    pub fn find_by_url(&self, url: &str) -> Option<Station> {
        self.stations().into_iter().find(|s| s.url == url)
    }

    // ── editor operations ─────────────────────────────────────────────────────

    pub fn add_group(&mut self, name: &str) -> anyhow::Result<usize> {
        let name = non_empty(name, "group name")?;
        self.groups.push(BookmarkGroup::new(name));
        Ok(self.groups.len() - 1)
    }

    pub fn rename_group(&mut self, group_idx: usize, name: &str) -> anyhow::Result<()> {
        let name = non_empty(name, "group name")?;
        self.group_mut(group_idx)?.group = name.to_string();
        Ok(())
    }

    pub fn remove_group(&mut self, group_idx: usize) -> anyhow::Result<BookmarkGroup> {
        self.group_mut(group_idx)?;
        Ok(self.groups.remove(group_idx))
    }

    pub fn add_station(&mut self, group_idx: usize, name: &str, url: &str) -> anyhow::Result<usize> {
        let entry = BookmarkEntry::new(non_empty(name, "station name")?, non_empty(url, "station URL")?);
        let group = self.group_mut(group_idx)?;
        group.stations.push(entry);
        Ok(group.stations.len() - 1)
    }

    pub fn edit_station(
        &mut self,
        group_idx: usize,
        station_idx: usize,
        name: &str,
        url: &str,
    ) -> anyhow::Result<()> {
        let name = non_empty(name, "station name")?;
        let url = non_empty(url, "station URL")?;
        let entry = self.entry_mut(group_idx, station_idx)?;
        entry.name = name.to_string();
        entry.url = url.to_string();
        Ok(())
    }

    pub fn remove_station(
        &mut self,
        group_idx: usize,
        station_idx: usize,
    ) -> anyhow::Result<BookmarkEntry> {
        self.entry_mut(group_idx, station_idx)?;
        Ok(self.groups[group_idx].stations.remove(station_idx))
    }

    /// Shift a group up (`-1`) or down (`1`).  Returns the new index, or
    /// `None` if the move would leave the list.
    pub fn move_group(&mut self, group_idx: usize, delta: isize) -> anyhow::Result<Option<usize>> {
        self.group_mut(group_idx)?;
        Ok(shift(&mut self.groups, group_idx, delta))
    }

    pub fn move_station(
        &mut self,
        group_idx: usize,
        station_idx: usize,
        delta: isize,
    ) -> anyhow::Result<Option<usize>> {
        self.entry_mut(group_idx, station_idx)?;
        Ok(shift(&mut self.groups[group_idx].stations, station_idx, delta))
    }

    /// Append the entries of an m3u playlist to `group`, creating it if
    /// needed.  Returns how many stations were added.
    pub fn import_m3u(&mut self, group: &str, content: &str) -> anyhow::Result<usize> {
        let entries = parse_m3u_from_str(content);
        let count = entries.len();
        let idx = match self.groups.iter().position(|g| g.group == group) {
            Some(idx) => idx,
            None => self.add_group(group)?,
        };
        self.groups[idx].stations.extend(entries);
        Ok(count)
    }

    fn group_mut(&mut self, group_idx: usize) -> anyhow::Result<&mut BookmarkGroup> {
        let len = self.groups.len();
        self.groups
            .get_mut(group_idx)
            .ok_or_else(|| anyhow::anyhow!("group {} out of range ({} groups)", group_idx, len))
    }

    fn entry_mut(
        &mut self,
        group_idx: usize,
        station_idx: usize,
    ) -> anyhow::Result<&mut BookmarkEntry> {
        let group = self.group_mut(group_idx)?;
        let len = group.stations.len();
        group.stations.get_mut(station_idx).ok_or_else(|| {
            anyhow::anyhow!("station {} out of range ({} stations)", station_idx, len)
        })
    }
}

fn non_empty<'a>(value: &'a str, what: &str) -> anyhow::Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{} must not be empty", what);
    }
    Ok(trimmed)
}

fn shift<T>(items: &mut Vec<T>, idx: usize, delta: isize) -> Option<usize> {
    let target = idx.checked_add_signed(delta)?;
    if target >= items.len() {
        return None;
    }
    let item = items.remove(idx);
    items.insert(target, item);
    Some(target)
}

pub fn parse_m3u_from_str(content: &str) -> Vec<BookmarkEntry> {
    let mut entries = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let name = pending_name.take().unwrap_or_else(|| url.clone());
        entries.push(BookmarkEntry::new(name, url));
    }

    entries
}
