//! Content-based file matching used to recognise files that were moved or
//! renamed after their metadata was recorded.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::{FileMetadata, MovedFile};

/// A single way of deciding that two file records denote the same object.
pub trait MatchStrategy {
    fn find_match<'a>(
        &self,
        file: &FileMetadata,
        candidates: &'a [FileMetadata],
    ) -> Option<&'a FileMetadata>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumMatch;

impl MatchStrategy for ChecksumMatch {
    fn find_match<'a>(
        &self,
        file: &FileMetadata,
        candidates: &'a [FileMetadata],
    ) -> Option<&'a FileMetadata> {
        let checksum = file.checksum.as_deref()?;
        candidates
            .iter()
            .find(|candidate| candidate.checksum.as_deref() == Some(checksum))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameSizeMatch;

impl MatchStrategy for FilenameSizeMatch {
    fn find_match<'a>(
        &self,
        file: &FileMetadata,
        candidates: &'a [FileMetadata],
    ) -> Option<&'a FileMetadata> {
        let size = file.size?;
        candidates
            .iter()
            .find(|candidate| candidate.size == Some(size) && candidate.filename() == file.filename())
    }
}

/// Tries checksum equality first, then filename + size equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMatcher {
    checksum: ChecksumMatch,
    filename_size: FilenameSizeMatch,
}

impl FileMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_match<'a>(
        &self,
        file: &FileMetadata,
        candidates: &'a [FileMetadata],
    ) -> Option<&'a FileMetadata> {
        self.checksum
            .find_match(file, candidates)
            .or_else(|| self.filename_size.find_match(file, candidates))
    }

    /// Maps each known path to the bucket location its content was found at.
    ///
    /// Bucket files already sitting at a known path are skipped. When several
    /// bucket files match the same known file, the first one listed is kept.
    pub fn find_moved_files(
        &self,
        known_files: &[FileMetadata],
        bucket_files: &[FileMetadata],
    ) -> BTreeMap<String, MovedFile> {
        let known_paths = known_files
            .iter()
            .map(|file| file.path.as_str())
            .collect::<HashSet<_>>();

        let mut moved = BTreeMap::new();
        for bucket_file in bucket_files {
            if known_paths.contains(bucket_file.path.as_str()) {
                continue;
            }
            let Some(known) = self.find_match(bucket_file, known_files) else {
                continue;
            };
            if known.path == bucket_file.path {
                continue;
            }
            moved
                .entry(known.path.clone())
                .or_insert_with(|| MovedFile {
                    original_path: known.path.clone(),
                    new_path: bucket_file.path.clone(),
                    metadata: bucket_file.clone(),
                });
        }
        moved
    }

    /// Bucket files with no metadata record, no moved-file match, and no
    /// checksum in common with an analysis output.
    pub fn find_uningested_files(
        &self,
        known_files: &[FileMetadata],
        bucket_files: &[FileMetadata],
        moved_files: &BTreeMap<String, MovedFile>,
        analysis_outputs: &[FileMetadata],
    ) -> Vec<FileMetadata> {
        let known_paths = known_files
            .iter()
            .map(|file| file.path.as_str())
            .collect::<HashSet<_>>();
        let moved_targets = moved_files
            .values()
            .map(|moved| moved.new_path.as_str())
            .collect::<HashSet<_>>();
        let output_checksums = analysis_outputs
            .iter()
            .filter_map(|file| file.checksum.as_deref())
            .collect::<HashSet<_>>();

        bucket_files
            .iter()
            .filter(|file| !known_paths.contains(file.path.as_str()))
            .filter(|file| !moved_targets.contains(file.path.as_str()))
            .filter(|file| {
                file.checksum
                    .as_deref()
                    .is_none_or(|checksum| !output_checksums.contains(checksum))
            })
            .cloned()
            .collect()
    }
}

/// Groups files sharing a checksum, keeping only groups with more than one member.
pub fn find_duplicate_files(files: &[FileMetadata]) -> HashMap<String, Vec<FileMetadata>> {
    let mut groups: HashMap<String, Vec<FileMetadata>> = HashMap::new();
    for file in files {
        if let Some(checksum) = &file.checksum {
            groups.entry(checksum.clone()).or_default().push(file.clone());
        }
    }
    groups.retain(|_, members| members.len() > 1);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: Option<u64>, checksum: Option<&str>) -> FileMetadata {
        FileMetadata::new(path, size, checksum)
    }

    #[test]
    fn checksum_match_takes_priority() {
        let candidates = vec![
            file("gs://b/other/sample_R1.fq", Some(100), Some("aaa")),
            file("gs://b/known/sample_R1.fq", Some(100), Some("bbb")),
        ];
        let probe = file("gs://b/new/sample_R1.fq", Some(100), Some("bbb"));
        let matched = FileMatcher::new().find_match(&probe, &candidates).unwrap();
        assert_eq!(matched.path, "gs://b/known/sample_R1.fq");
    }

    #[test]
    fn filename_size_used_without_checksum() {
        let candidates = vec![file("gs://b/known/sample_R1.fq", Some(100), None)];
        let probe = file("gs://b/new/sample_R1.fq", Some(100), None);
        assert!(FileMatcher::new().find_match(&probe, &candidates).is_some());

        let wrong_size = file("gs://b/new/sample_R1.fq", Some(99), None);
        assert!(FileMatcher::new().find_match(&wrong_size, &candidates).is_none());

        let no_size = file("gs://b/new/sample_R1.fq", None, None);
        assert!(FileMatcher::new().find_match(&no_size, &candidates).is_none());
    }

    #[test]
    fn filename_must_match_exactly() {
        let candidates = vec![file("gs://b/known/sample_R1.fq.gz", Some(100), None)];
        let probe = file("gs://b/new/sample_R1.fq", Some(100), None);
        assert!(FileMatcher::new().find_match(&probe, &candidates).is_none());
    }

    #[test]
    fn moved_files_skip_known_paths() {
        let known = vec![file("gs://b/a/r1.fq", Some(5), Some("c1"))];
        let bucket = vec![
            file("gs://b/a/r1.fq", Some(5), Some("c1")),
            file("gs://b/moved/r1_renamed.fq", Some(5), Some("c1")),
            file("gs://b/unrelated.fq", Some(7), Some("zz")),
        ];
        let moved = FileMatcher::new().find_moved_files(&known, &bucket);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved["gs://b/a/r1.fq"].new_path, "gs://b/moved/r1_renamed.fq");
    }

    #[test]
    fn uningested_excludes_moved_and_analysis_outputs() {
        let known = vec![file("gs://b/a/r1.fq", Some(5), Some("c1"))];
        let bucket = vec![
            file("gs://b/a/r1.fq", Some(5), Some("c1")),
            file("gs://b/moved/r1.fq", Some(5), Some("c1")),
            file("gs://b/output.cram", Some(9), Some("out")),
            file("gs://b/new_R1.fq", Some(3), None),
        ];
        let outputs = vec![file("gs://analysis/x.cram", Some(9), Some("out"))];
        let matcher = FileMatcher::new();
        let moved = matcher.find_moved_files(&known, &bucket);
        let uningested = matcher.find_uningested_files(&known, &bucket, &moved, &outputs);
        let paths = uningested.iter().map(|f| f.path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, vec!["gs://b/new_R1.fq"]);
    }

    #[test]
    fn duplicate_groups_need_two_members() {
        let files = vec![
            file("gs://b/1.fq", None, Some("dup")),
            file("gs://b/2.fq", None, Some("dup")),
            file("gs://b/3.fq", None, Some("solo")),
            file("gs://b/4.fq", None, None),
        ];
        let groups = find_duplicate_files(&files);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["dup"].len(), 2);
    }
}
