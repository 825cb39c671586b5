use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{DownloadDescriptor, EvidenceItem, EvidenceUrl};

const MAX_STEM_CHARS: usize = 120;
const MAX_EXTENSION_CHARS: usize = 8;
const FALLBACK_STEM: &str = "document";
const DEFAULT_EXTENSION: &str = "pdf";

/// Markers searched for in the download URL, in priority order.
const URL_EXTENSION_HINTS: &[(&[&str], &str)] = &[
    (&[".pdf"], "pdf"),
    (&[".json"], "json"),
    (&[".docx"], "docx"),
    (&[".xlsx"], "xlsx"),
    (&[".png", ".jpg", ".jpeg"], "png"),
];

/// Evidence names containing one of these are almost always PDF documents.
const DOCUMENT_KEYWORDS: &[&str] = &["policy", "handbook", "procedure", "agreement", "document"];

/// How downloaded files are laid out under the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderStructure {
    /// Every file directly in the output directory.
    #[default]
    Single,
    /// One subfolder per descriptor: `{prefix}-{NNN}__{group_key}`.
    Separate,
}

/// Pick the file name for one URL of an evidence item, guaranteeing an extension.
///
/// The name comes from the listing's filename, then the URL entry id, then the
/// evidence name. When it carries no extension one is inferred from the URL,
/// then from document-like words in the evidence name, then defaults to `pdf`.
pub fn descriptor_file_name(entry: &EvidenceUrl, evidence: &EvidenceItem) -> String {
    let base = [
        entry.filename.as_deref(),
        entry.id.as_deref(),
        Some(evidence.name.as_str()),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|candidate| !candidate.is_empty())
    .unwrap_or(FALLBACK_STEM);

    if split_extension(base).1.is_some() {
        return base.to_string();
    }
    format!("{base}.{}", infer_extension(&entry.url, &evidence.name))
}

pub fn infer_extension(url: &str, evidence_name: &str) -> &'static str {
    let url = url.to_ascii_lowercase();
    for (markers, extension) in URL_EXTENSION_HINTS {
        if markers.iter().any(|marker| url.contains(marker)) {
            return extension;
        }
    }

    let name = evidence_name.to_lowercase();
    if DOCUMENT_KEYWORDS.iter().any(|keyword| name.contains(keyword)) {
        return "pdf";
    }
    DEFAULT_EXTENSION
}

/// Filesystem-safe version of `name` that keeps its extension.
pub fn sanitize_file_name(name: &str) -> String {
    let (stem, extension) = split_extension(name);
    let stem = sanitize_component(stem);
    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Replace forbidden characters, trim, collapse underscores and guard against
/// reserved Windows device names. Never returns an empty string.
pub fn sanitize_component(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);

    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }

    let mut final_name: String = compacted.chars().take(MAX_STEM_CHARS).collect();
    if final_name.is_empty() {
        final_name = FALLBACK_STEM.to_string();
    }
    if is_reserved_windows_name(&final_name) {
        final_name.push('_');
    }
    final_name
}

/// Compute every descriptor's target path, in input order.
///
/// Descriptors that would land on the same path are numbered `name (1).ext`,
/// `name (2).ext`, ... in input order, so the same descriptor list always maps
/// to the same paths. Whether a file already sits at a planned path is left to
/// the caller: a non-empty file there is the output of an earlier run.
pub fn plan_target_paths(
    descriptors: &[DownloadDescriptor],
    output_dir: &Path,
    structure: FolderStructure,
    folder_prefix: &str,
) -> Vec<PathBuf> {
    let mut claimed = HashSet::with_capacity(descriptors.len());
    descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| {
            let file_name = sanitize_file_name(&descriptor.suggested_file_name);
            let dir = match structure {
                FolderStructure::Single => output_dir.to_path_buf(),
                FolderStructure::Separate => output_dir.join(group_folder_name(
                    folder_prefix,
                    index,
                    &descriptor.group_key,
                )),
            };
            claim_unique(&dir, &file_name, &mut claimed)
        })
        .collect()
}

/// `{prefix}-{NNN}__{group_key}` with a one-based, zero-padded sequence number.
pub fn group_folder_name(prefix: &str, index: usize, group_key: &str) -> String {
    let prefix = sanitize_component(prefix);
    let key = sanitize_component(group_key);
    format!("{prefix}-{:03}__{key}", index + 1)
}

fn claim_unique(dir: &Path, file_name: &str, claimed: &mut HashSet<PathBuf>) -> PathBuf {
    let candidate = dir.join(file_name);
    if claimed.insert(candidate.clone()) {
        return candidate;
    }

    let (stem, extension) = split_extension(file_name);
    let suffix = extension.map(|ext| format!(".{ext}")).unwrap_or_default();
    let mut n = 1usize;
    loop {
        let numbered = dir.join(format!("{stem} ({n}){suffix}"));
        if claimed.insert(numbered.clone()) {
            return numbered;
        }
        n += 1;
    }
}

/// Split `name` into stem and a conventional extension (short, alphanumeric).
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.trim().is_empty()
                && !ext.is_empty()
                && ext.chars().count() <= MAX_EXTENSION_CHARS
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}
