//! Region directory
//!
//! Static bidirectional map between business regions and backend groups.
//! Built once at startup and shared read-only.

use std::collections::HashMap;

use supportdesk_shared::{DeskError, GroupId, Region};

#[derive(Debug, Clone)]
pub struct RegionDirectory {
    by_code: HashMap<String, GroupId>,
    by_group: HashMap<GroupId, Region>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegionTableError {
    #[error("Region '{0}' is listed twice")]
    DuplicateRegion(String),
    #[error("Group {0} is mapped to more than one region")]
    DuplicateGroup(GroupId),
    #[error("Region table is empty")]
    Empty,
}

impl RegionDirectory {
    /// Build the directory, rejecting tables that are not a bijection
    pub fn new(regions: impl IntoIterator<Item = Region>) -> Result<Self, RegionTableError> {
        let mut by_code = HashMap::new();
        let mut by_group = HashMap::new();

        for region in regions {
            if by_code.contains_key(&region.code) {
                return Err(RegionTableError::DuplicateRegion(region.code));
            }
            if by_group.contains_key(&region.backend_group_id) {
                return Err(RegionTableError::DuplicateGroup(region.backend_group_id));
            }
            by_code.insert(region.code.clone(), region.backend_group_id);
            by_group.insert(region.backend_group_id, region);
        }

        if by_code.is_empty() {
            return Err(RegionTableError::Empty);
        }

        Ok(Self { by_code, by_group })
    }

    pub fn group_id_for(&self, region: &str) -> Result<GroupId, DeskError> {
        self.by_code
            .get(region)
            .copied()
            .ok_or_else(|| DeskError::UnknownRegion(region.to_string()))
    }

    pub fn region_for(&self, group_id: GroupId) -> Option<&Region> {
        self.by_group.get(&group_id)
    }

    pub fn contains(&self, region: &str) -> bool {
        self.by_code.contains_key(region)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn region(code: &str, group: i64) -> Region {
        Region {
            code: code.to_string(),
            backend_group_id: GroupId(group),
        }
    }

    #[test]
    fn test_lookup_both_directions() {
        let directory =
            RegionDirectory::new([region("asia-pacific", 4), region("europe-zone-1", 7)]).unwrap();

        assert_eq!(directory.group_id_for("asia-pacific").unwrap(), GroupId(4));
        assert_eq!(
            directory.region_for(GroupId(7)).map(|r| r.code.as_str()),
            Some("europe-zone-1")
        );
        assert!(directory.region_for(GroupId(99)).is_none());
    }

    #[test]
    fn test_unknown_region() {
        let directory = RegionDirectory::new([region("asia-pacific", 4)]).unwrap();
        let err = directory.group_id_for("mars").unwrap_err();
        assert!(matches!(err, DeskError::UnknownRegion(code) if code == "mars"));
    }

    #[test]
    fn test_rejects_non_bijective_tables() {
        assert_eq!(
            RegionDirectory::new([region("a", 1), region("b", 1)]).unwrap_err(),
            RegionTableError::DuplicateGroup(GroupId(1))
        );
        assert_eq!(
            RegionDirectory::new([region("a", 1), region("a", 2)]).unwrap_err(),
            RegionTableError::DuplicateRegion("a".to_string())
        );
        assert_eq!(
            RegionDirectory::new(Vec::new()).unwrap_err(),
            RegionTableError::Empty
        );
    }
}
