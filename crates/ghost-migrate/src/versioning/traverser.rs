//! Path queries over the changelog chain.

use serde::{Deserialize, Serialize};

use super::changelog::Changelog;
use super::version::Version;
use crate::error::{MigrateError, Result};

/// Direction of travel between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forwards,
    Backwards,
}

impl Changelog {
    /// Versions from `from` to `to` inclusive, walking towards the root when
    /// `to` is older than `from`.
    pub fn find_path(&self, from: &str, to: &str) -> Result<Vec<&Version>> {
        let start = self.position(from)?;
        let end = self.position(to)?;
        if start <= end {
            Ok(self.versions[start..=end].iter().collect())
        } else {
            Ok(self.versions[end..=start].iter().rev().collect())
        }
    }

    /// Versions from `from` to `to` inclusive, following child links only.
    pub fn find_child_path(&self, from: &str, to: &str) -> Result<Vec<&Version>> {
        let start = self.position(from)?;
        let end = self.position(to)?;
        if start > end {
            return Err(MigrateError::IllegalState(format!(
                "No child path from version '{}' to older version '{}'",
                from, to
            )));
        }
        Ok(self.versions[start..=end].iter().collect())
    }

    pub fn direction(&self, from: &str, to: &str) -> Result<Direction> {
        let start = self.position(from)?;
        let end = self.position(to)?;
        match start.cmp(&end) {
            std::cmp::Ordering::Less => Ok(Direction::Forwards),
            std::cmp::Ordering::Greater => Ok(Direction::Backwards),
            std::cmp::Ordering::Equal => Err(MigrateError::IllegalState(format!(
                "Version '{}' has no direction relative to itself",
                from
            ))),
        }
    }

    /// The oldest of the given versions in chain order. Unknown ids are
    /// ignored.
    pub fn first<'a, I>(&self, versions: I) -> Option<&Version>
    where
        I: IntoIterator<Item = &'a String>,
    {
        versions
            .into_iter()
            .filter_map(|id| self.position(id).ok())
            .min()
            .map(|position| &self.versions[position])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::drop_table;

    fn make_test_changelog() -> (Changelog, Vec<String>) {
        let mut changelog = Changelog::with_root("root");
        changelog
            .add_change_set(
                "alice",
                None,
                vec![
                    drop_table("a").unwrap().into(),
                    drop_table("b").unwrap().into(),
                    drop_table("c").unwrap().into(),
                ],
            )
            .unwrap();
        let ids = changelog.versions().map(|v| v.id.clone()).collect();
        (changelog, ids)
    }

    #[test]
    fn test_find_path_both_directions() {
        let (changelog, ids) = make_test_changelog();
        let forward: Vec<_> = changelog
            .find_path(&ids[0], &ids[2])
            .unwrap()
            .iter()
            .map(|v| v.id.clone())
            .collect();
        assert_eq!(forward, ids[0..=2].to_vec());

        let backward: Vec<_> = changelog
            .find_path(&ids[3], &ids[1])
            .unwrap()
            .iter()
            .map(|v| v.id.clone())
            .collect();
        assert_eq!(backward, vec![ids[3].clone(), ids[2].clone(), ids[1].clone()]);
    }

    #[test]
    fn test_child_path_refuses_backwards() {
        let (changelog, ids) = make_test_changelog();
        assert_eq!(changelog.find_child_path(&ids[1], &ids[1]).unwrap().len(), 1);
        assert!(changelog.find_child_path(&ids[3], &ids[0]).is_err());
    }

    #[test]
    fn test_direction_and_first() {
        let (changelog, ids) = make_test_changelog();
        assert_eq!(changelog.direction(&ids[0], &ids[3]).unwrap(), Direction::Forwards);
        assert_eq!(changelog.direction(&ids[3], &ids[0]).unwrap(), Direction::Backwards);
        assert!(changelog.direction(&ids[2], &ids[2]).is_err());

        let set = vec![ids[3].clone(), ids[1].clone(), "unknown".to_string()];
        assert_eq!(changelog.first(&set).unwrap().id, ids[1]);
    }
}
