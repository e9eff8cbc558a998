//! Classifies bucket contents against sequencing metadata.
//!
//! Read files of aligned (CRAM-complete) sequencing groups that are still
//! present in the bucket are proposed for deletion, files whose content is
//! known but that sit at a different path are reported as moved, and
//! everything unrecognised goes to review unless its name ties it to an
//! aligned sequencing group.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Analysis, FileMetadata, MovedFile, ReviewAction, SequencingGroup};
use crate::matching::{FileMatcher, find_duplicate_files};
use crate::report::AuditReportEntry;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditResult {
    pub files_to_delete: Vec<AuditReportEntry>,
    pub files_to_review: Vec<AuditReportEntry>,
    pub moved_files: Vec<AuditReportEntry>,
    pub unaligned_sequencing_groups: Vec<SequencingGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditAnalyzer {
    matcher: FileMatcher,
}

impl AuditAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the full classification. `cram_analysis` is (re)assigned on every
    /// supplied sequencing group.
    pub fn analyze(
        &self,
        sequencing_groups: &mut [SequencingGroup],
        bucket_files: &[FileMetadata],
        analyses: &[Analysis],
        excluded_sg_ids: &[String],
    ) -> AuditResult {
        link_cram_analyses(sequencing_groups, analyses);
        let excluded = excluded_sg_ids
            .iter()
            .map(String::as_str)
            .collect::<HashSet<_>>();
        let sequencing_groups: &[SequencingGroup] = sequencing_groups;

        let unaligned_sequencing_groups = sequencing_groups
            .iter()
            .filter(|sg| !sg.is_complete())
            .cloned()
            .collect::<Vec<_>>();

        let known_files = sequencing_groups
            .iter()
            .flat_map(|sg| sg.read_files().map(|(_, file)| file.clone()))
            .collect::<Vec<_>>();
        let analysis_outputs = analyses
            .iter()
            .filter_map(|analysis| analysis.output_file.clone())
            .collect::<Vec<_>>();

        for (checksum, files) in find_duplicate_files(bucket_files) {
            debug!(checksum = %checksum, copies = files.len(), "duplicate objects in bucket");
        }

        let moved = self.matcher.find_moved_files(&known_files, bucket_files);
        let uningested = self.matcher.find_uningested_files(
            &known_files,
            bucket_files,
            &moved,
            &analysis_outputs,
        );

        let eligible =
            |sg: &SequencingGroup| sg.is_complete() && !excluded.contains(sg.id.as_str());

        let mut files_to_delete = DeleteList::default();
        collect_read_deletions(
            sequencing_groups,
            bucket_files,
            &moved,
            &eligible,
            &mut files_to_delete,
        );
        collect_original_file_deletions(
            sequencing_groups,
            analyses,
            &eligible,
            &mut files_to_delete,
        );

        let mut files_to_review = Vec::new();
        for file in &uningested {
            match infer_owner(file, sequencing_groups, &eligible) {
                Some(owner) => {
                    debug!(
                        path = %file.path,
                        sg_id = %owner.id,
                        "uningested file matched to aligned group"
                    );
                    files_to_delete.push(
                        AuditReportEntry::for_sequencing_group(owner, None, file)
                            .with_action(ReviewAction::Delete),
                    );
                }
                None => files_to_review.push(AuditReportEntry::for_file(file)),
            }
        }

        let moved_files = moved_entries(sequencing_groups, &moved, &eligible);

        let result = AuditResult {
            files_to_delete: files_to_delete.into_entries(),
            files_to_review,
            moved_files,
            unaligned_sequencing_groups,
        };
        info!(
            files_to_delete = result.files_to_delete.len(),
            files_to_review = result.files_to_review.len(),
            moved_files = result.moved_files.len(),
            unaligned_sgs = result.unaligned_sequencing_groups.len(),
            "audit analysis complete"
        );
        result
    }
}

/// Links each sequencing group to its most recently completed CRAM; ties
/// keep the first analysis seen.
pub fn link_cram_analyses(sequencing_groups: &mut [SequencingGroup], analyses: &[Analysis]) {
    let mut latest: HashMap<&str, &Analysis> = HashMap::new();
    for analysis in analyses.iter().filter(|analysis| analysis.is_cram()) {
        let Some(sg_id) = analysis.sequencing_group_id.as_deref() else {
            continue;
        };
        latest
            .entry(sg_id)
            .and_modify(|current| {
                if analysis.timestamp_completed > current.timestamp_completed {
                    *current = analysis;
                }
            })
            .or_insert(analysis);
    }

    for sg in sequencing_groups.iter_mut() {
        sg.cram_analysis = latest.get(sg.id.as_str()).map(|analysis| (*analysis).clone());
    }
}

/// Delete rows, kept in emission order and unique by path.
#[derive(Default)]
struct DeleteList {
    seen: HashSet<String>,
    entries: Vec<AuditReportEntry>,
}

impl DeleteList {
    fn push(&mut self, entry: AuditReportEntry) {
        if self.seen.insert(entry.filepath.clone()) {
            self.entries.push(entry);
        }
    }

    fn into_entries(self) -> Vec<AuditReportEntry> {
        self.entries
    }
}

fn collect_read_deletions(
    sequencing_groups: &[SequencingGroup],
    bucket_files: &[FileMetadata],
    moved: &BTreeMap<String, MovedFile>,
    eligible: &dyn Fn(&SequencingGroup) -> bool,
    out: &mut DeleteList,
) {
    let observed = bucket_files
        .iter()
        .map(|file| file.path.as_str())
        .chain(moved.values().map(|moved| moved.new_path.as_str()))
        .collect::<HashSet<_>>();

    for sg in sequencing_groups.iter().filter(|sg| eligible(*sg)) {
        for (assay, file) in sg.read_files() {
            if observed.contains(file.path.as_str()) {
                out.push(
                    AuditReportEntry::for_sequencing_group(sg, Some(assay.id), file)
                        .with_action(ReviewAction::Delete),
                );
            }
        }
    }
}

fn collect_original_file_deletions(
    sequencing_groups: &[SequencingGroup],
    analyses: &[Analysis],
    eligible: &dyn Fn(&SequencingGroup) -> bool,
    out: &mut DeleteList,
) {
    let by_id = sequencing_groups
        .iter()
        .map(|sg| (sg.id.as_str(), sg))
        .collect::<HashMap<_, _>>();

    for analysis in analyses {
        let Some(original) = &analysis.original_file else {
            continue;
        };
        if analysis.output_path() == Some(original.path.as_str()) {
            continue;
        }
        let Some(sg) = analysis
            .sequencing_group_id
            .as_deref()
            .and_then(|sg_id| by_id.get(sg_id))
        else {
            warn!(analysis_id = analysis.id, "original file for unknown sequencing group");
            continue;
        };
        if eligible(*sg) {
            out.push(
                AuditReportEntry::for_sequencing_group(sg, None, original)
                    .with_action(ReviewAction::Delete),
            );
        }
    }
}

/// Sample external ids are tried across every group before participant ids.
fn infer_owner<'a>(
    file: &FileMetadata,
    sequencing_groups: &'a [SequencingGroup],
    eligible: &dyn Fn(&SequencingGroup) -> bool,
) -> Option<&'a SequencingGroup> {
    let filename = file.filename();
    let candidates = sequencing_groups
        .iter()
        .filter(|sg| eligible(*sg))
        .collect::<Vec<_>>();
    let names_file = |id: &str| !id.trim().is_empty() && filename.contains(id.trim());

    candidates
        .iter()
        .find(|sg| sg.sample.external_ids.values().any(names_file))
        .or_else(|| {
            candidates
                .iter()
                .find(|sg| sg.sample.participant.external_ids.values().any(names_file))
        })
        .copied()
}

fn moved_entries(
    sequencing_groups: &[SequencingGroup],
    moved: &BTreeMap<String, MovedFile>,
    eligible: &dyn Fn(&SequencingGroup) -> bool,
) -> Vec<AuditReportEntry> {
    let owners = sequencing_groups
        .iter()
        .flat_map(|sg| {
            sg.read_files()
                .map(move |(assay, file)| (file.path.as_str(), (sg, assay.id)))
        })
        .collect::<HashMap<_, _>>();

    moved
        .values()
        .filter_map(|moved| {
            let (sg, assay_id) = owners.get(moved.original_path.as_str())?;
            if !eligible(*sg) {
                return None;
            }
            Some(
                AuditReportEntry::for_sequencing_group(sg, Some(*assay_id), &moved.metadata)
                    .with_action(ReviewAction::Delete),
            )
        })
        .collect()
}
