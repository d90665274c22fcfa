//! Transcript export renderings.
//!
//! Pure functions from a task snapshot to downloadable bytes. Three formats:
//! plain text, SubRip subtitles and a structured JSON document. Tasks whose
//! segments carry no text fall back to the accumulated transcript; subtitle
//! timings are then synthesized sentence by sentence.

use itertools::Itertools;
use scribe_types::{ExportFormat, Segment, Task};
use serde::Serialize;
use thiserror::Error;

/// Floor for a synthesized cue's duration.
const MIN_CUE_MS: u64 = 1_500;
/// Reading-speed estimate used for synthesized cue durations.
const MS_PER_CHAR: u64 = 120;

/// Sentence terminators recognized when synthesizing cue boundaries.
const TERMINALS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

#[derive(Debug, Error)]
pub enum ExportError {
    /// The task has neither usable segments nor accumulated text.
    #[error("task {task_id} has no transcript content to export")]
    NoContent { task_id: String },
    #[error("failed to encode transcript: {source}")]
    Encode {
        #[from]
        source: serde_json::Error,
    },
}

/// Render `task`'s transcript in the requested format.
pub fn render(task: &Task, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Txt => plain_text(task).map(String::into_bytes),
        ExportFormat::Srt => subtitles(task).map(String::into_bytes),
        ExportFormat::Json => structured(task),
    }
}

/// Segment texts joined with single spaces; falls back to the accumulated
/// transcript when no segment carries text.
fn plain_text(task: &Task) -> Result<String, ExportError> {
    let joined = task
        .segments
        .iter()
        .map(|segment| segment.text.trim())
        .filter(|text| !text.is_empty())
        .join(" ");
    if !joined.is_empty() {
        return Ok(joined);
    }
    fallback_text(task).map(str::to_owned)
}

fn fallback_text(task: &Task) -> Result<&str, ExportError> {
    match task.result_text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(ExportError::NoContent {
            task_id: task.id.clone(),
        }),
    }
}

struct Cue {
    number: usize,
    start_ms: u64,
    end_ms: u64,
    text: String,
}

fn subtitles(task: &Task) -> Result<String, ExportError> {
    let mut cues = cues_from_segments(&task.segments);
    if cues.is_empty() {
        cues = synthesize_cues(fallback_text(task)?);
    }
    if cues.is_empty() {
        return Err(ExportError::NoContent {
            task_id: task.id.clone(),
        });
    }
    let rendered = cues
        .iter()
        .map(|cue| {
            format!(
                "{}\n{} --> {}\n{}\n",
                cue.number,
                srt_timestamp(cue.start_ms),
                srt_timestamp(cue.end_ms),
                cue.text
            )
        })
        .join("\n");
    Ok(rendered)
}

/// Cues from real segments. Silent segments are skipped and the remaining
/// cues renumbered from 1, as SubRip requires.
fn cues_from_segments(segments: &[Segment]) -> Vec<Cue> {
    segments
        .iter()
        .filter(|segment| !segment.text.trim().is_empty())
        .enumerate()
        .map(|(position, segment)| Cue {
            number: position + 1,
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
            text: segment.text.trim().to_owned(),
        })
        .collect()
}

/// Invent timings for a transcript that has no per-segment timestamps:
/// one cue per sentence, duration scaled to its length, no gaps.
fn synthesize_cues(text: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut cursor = 0u64;
    for (position, sentence) in split_sentences(text).into_iter().enumerate() {
        let duration = (sentence.chars().count() as u64 * MS_PER_CHAR).max(MIN_CUE_MS);
        cues.push(Cue {
            number: position + 1,
            start_ms: cursor,
            end_ms: cursor + duration,
            text: sentence,
        });
        cursor += duration;
    }
    cues
}

/// Split on sentence terminators, keeping the terminator. A run of
/// terminators ("wait...") stays with its sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if TERMINALS.contains(&ch) {
            let run_continues = chars.peek().is_some_and(|next| TERMINALS.contains(next));
            if !run_continues {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_owned());
                }
                current.clear();
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }
    sentences
}

fn srt_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

#[derive(Debug, Serialize)]
struct TranscriptDocument<'a> {
    id: &'a str,
    text: String,
    segments: Vec<Segment>,
}

fn structured(task: &Task) -> Result<Vec<u8>, ExportError> {
    let text = plain_text(task)?;
    let has_spoken_segments = task
        .segments
        .iter()
        .any(|segment| !segment.text.trim().is_empty());
    let segments = if has_spoken_segments {
        task.segments.clone()
    } else {
        synthesize_cues(&text)
            .into_iter()
            .map(|cue| Segment {
                index: cue.number - 1,
                start_ms: cue.start_ms,
                end_ms: cue.end_ms,
                text: cue.text,
            })
            .collect()
    };
    let document = TranscriptDocument {
        id: &task.id,
        text,
        segments,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_segments(texts: &[&str]) -> Task {
        let mut task = Task::new("meeting.mp3");
        for (i, text) in texts.iter().enumerate() {
            let start = i as u64 * 2_000;
            task.push_segment(start, start + 2_000, *text);
        }
        task
    }

    fn render_string(task: &Task, format: ExportFormat) -> String {
        String::from_utf8(render(task, format).unwrap()).unwrap()
    }

    #[test]
    fn txt_joins_segment_texts_with_spaces() {
        let task = task_with_segments(&["hello", "", "world"]);
        assert_eq!(render_string(&task, ExportFormat::Txt), "hello world");
    }

    #[test]
    fn txt_falls_back_to_accumulated_transcript() {
        let mut task = Task::new("meeting.mp3");
        task.result_text = Some("from the running transcript".to_owned());
        assert_eq!(
            render_string(&task, ExportFormat::Txt),
            "from the running transcript"
        );
    }

    #[test]
    fn empty_task_has_nothing_to_export() {
        let task = Task::new("meeting.mp3");
        for format in [ExportFormat::Txt, ExportFormat::Srt, ExportFormat::Json] {
            let err = render(&task, format).unwrap_err();
            assert!(matches!(err, ExportError::NoContent { .. }), "{format}");
        }
    }

    #[test]
    fn srt_first_block_is_exact() {
        let task = task_with_segments(&["A", "B", "C"]);
        let srt = render_string(&task, ExportFormat::Srt);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:02,000\nA\n\n2\n"));
        assert!(srt.ends_with("C\n"));
        assert_eq!(srt.matches("-->").count(), 3);
    }

    #[test]
    fn srt_timestamps_roll_over_hours_minutes_seconds() {
        let mut task = Task::new("long.mp3");
        task.push_segment(3_723_004, 3_725_999, "late in the recording");
        let srt = render_string(&task, ExportFormat::Srt);
        assert!(srt.contains("01:02:03,004 --> 01:02:05,999"));
    }

    #[test]
    fn srt_skips_silent_segments_and_renumbers() {
        let task = task_with_segments(&["first", "   ", "third"]);
        let srt = render_string(&task, ExportFormat::Srt);
        assert!(srt.contains("1\n00:00:00,000 --> 00:00:02,000\nfirst\n"));
        assert!(srt.contains("2\n00:00:04,000 --> 00:00:06,000\nthird\n"));
        assert_eq!(srt.matches("-->").count(), 2);
    }

    #[test]
    fn srt_synthesis_floors_short_sentences_and_leaves_no_gaps() {
        let mut task = Task::new("meeting.mp3");
        let long = "this sentence keeps going well past the floor so its duration comes from its length";
        task.result_text = Some(format!("Short. {long}!"));
        let srt = render_string(&task, ExportFormat::Srt);

        // "Short." is 6 chars, well under the floor.
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nShort.\n"));
        // The long sentence starts exactly where the first ended.
        let long_chars = (long.chars().count() + 1) as u64; // plus the "!"
        let expected_end = 1_500 + long_chars * MS_PER_CHAR;
        assert!(srt.contains(&format!(
            "2\n00:00:01,500 --> {}\n",
            srt_timestamp(expected_end)
        )));
    }

    #[test]
    fn sentence_split_keeps_terminators_and_runs() {
        assert_eq!(
            split_sentences("Wait... what? Yes."),
            vec!["Wait...", "what?", "Yes."]
        );
        assert_eq!(split_sentences("你好。世界！"), vec!["你好。", "世界！"]);
        // No terminator at all: one trailing sentence.
        assert_eq!(split_sentences("no punctuation here"), vec![
            "no punctuation here"
        ]);
    }

    #[test]
    fn json_document_keeps_real_segments_verbatim() {
        let task = task_with_segments(&["hello", "", "world"]);
        let value: serde_json::Value =
            serde_json::from_slice(&render(&task, ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(value["id"], task.id);
        assert_eq!(value["text"], "hello world");
        // All three recorded segments survive, silent one included.
        assert_eq!(value["segments"].as_array().unwrap().len(), 3);
        assert_eq!(value["segments"][1]["text"], "");
        assert_eq!(value["segments"][2]["start_ms"], 4_000);
    }

    #[test]
    fn json_document_synthesizes_segments_from_transcript() {
        let mut task = Task::new("meeting.mp3");
        task.result_text = Some("One. Two.".to_owned());
        let value: serde_json::Value =
            serde_json::from_slice(&render(&task, ExportFormat::Json).unwrap()).unwrap();
        let segments = value["segments"].as_array().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0]["start_ms"], 0);
        assert_eq!(segments[0]["end_ms"], 1_500);
        assert_eq!(segments[1]["start_ms"], 1_500);
        assert_eq!(segments[1]["index"], 1);
    }
}
