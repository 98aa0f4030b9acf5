use serde::Serialize;

use super::client::{ComfyClient, JobHistory, NodeOutput};

/// A resolved artifact: where the backend serves it from and the filename
/// it was stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub url: String,
    pub filename: String,
}

/// Which output shapes an engine's result record may use.
///
/// Every engine produces `videos` or `gifs` in the happy case; the flags
/// widen the search for engines whose save nodes report differently.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionRule {
    /// Accept video-extension filenames listed under `images`
    /// (transformer save nodes do this).
    pub video_in_images: bool,
    /// Accept an `.mp4` path embedded in the node's free-text output.
    pub text_path: bool,
    /// Fall back to the first image frame when nothing else matched
    /// (motion-transfer runs occasionally emit frames only).
    pub image_fallback: bool,
}

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "webm", "avi", "mov", "mkv"];

fn has_video_extension(filename: &str) -> bool {
    filename
        .rsplit('.')
        .next()
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pull the trailing `name.mp4` out of a free-text path output.
fn filename_from_text(text: &[String]) -> Option<String> {
    let joined = text.concat();
    let tail = joined
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(&joined)
        .trim()
        .to_string();
    if tail.to_ascii_lowercase().ends_with(".mp4") && !tail.is_empty() {
        Some(tail)
    } else {
        None
    }
}

/// Search one job's outputs for an artifact, in fixed priority order:
/// explicit `videos`, then `gifs`, then (per rule) video files hiding in
/// `images`, then (per rule) a filename embedded in `text`, then (per rule)
/// the first image frame. Returns `None` when no known shape matches.
pub fn extract_artifact(
    client: &ComfyClient,
    history: &JobHistory,
    rule: ExtractionRule,
) -> Option<ArtifactRef> {
    // Node iteration order is arbitrary; the priority applies across all
    // nodes, so each pass scans the whole map before falling through.
    if let Some(name) = first_match(history, |node| node.videos.first().map(|f| f.filename.clone()))
    {
        return Some(make_ref(client, name));
    }

    if let Some(name) = first_match(history, |node| node.gifs.first().map(|f| f.filename.clone())) {
        return Some(make_ref(client, name));
    }

    if rule.video_in_images {
        if let Some(name) = first_match(history, |node| {
            node.images
                .iter()
                .find(|f| has_video_extension(&f.filename))
                .map(|f| f.filename.clone())
        }) {
            return Some(make_ref(client, name));
        }
    }

    if rule.text_path {
        if let Some(name) = first_match(history, |node| filename_from_text(&node.text)) {
            return Some(make_ref(client, name));
        }
    }

    if rule.image_fallback {
        if let Some(name) =
            first_match(history, |node| node.images.first().map(|f| f.filename.clone()))
        {
            return Some(make_ref(client, name));
        }
    }

    None
}

/// True when the record already contains something a poll loop should stop
/// on — any output slot the rule recognizes.
pub fn has_any_output(history: &JobHistory, rule: ExtractionRule) -> bool {
    extract_artifact_probe(history, rule)
}

fn extract_artifact_probe(history: &JobHistory, rule: ExtractionRule) -> bool {
    history.outputs.values().any(|node| {
        !node.videos.is_empty()
            || !node.gifs.is_empty()
            || (rule.video_in_images
                && node.images.iter().any(|f| has_video_extension(&f.filename)))
            || (rule.text_path && filename_from_text(&node.text).is_some())
            || (rule.image_fallback && !node.images.is_empty())
    })
}

fn first_match<F>(history: &JobHistory, pick: F) -> Option<String>
where
    F: Fn(&NodeOutput) -> Option<String>,
{
    // Sort node ids for a deterministic scan; history maps keep insertion
    // order only by accident of the JSON parser.
    let mut node_ids: Vec<&String> = history.outputs.keys().collect();
    node_ids.sort();
    node_ids
        .into_iter()
        .find_map(|id| pick(&history.outputs[id]))
}

fn make_ref(client: &ComfyClient, filename: String) -> ArtifactRef {
    ArtifactRef {
        url: client.view_url(&filename),
        filename,
    }
}
