//! Captions and fan-out of pipeline artifacts to chat recipients.

use std::path::Path;

use crate::pipeline::{ImageOutcome, PipelineOutput, VideoOutcome};
use crate::transport::{ChatId, Messenger};

pub const ORIGINAL_IMAGE_CAPTION: &str = "Original image";
pub const ORIGINAL_VIDEO_CAPTION: &str = "Original video";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl DeliveryReport {
    pub fn all_sent(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, chat_id: ChatId, artifact: &Path, result: anyhow::Result<()>) {
        match result {
            Ok(()) => self.sent += 1,
            Err(err) => {
                log::warn!(
                    "failed to send {} to chat {}: {:#}",
                    artifact.display(),
                    chat_id,
                    err
                );
                self.failed += 1;
                self.errors.push(format!("{chat_id}: {err:#}"));
            }
        }
    }
}

pub fn image_caption(outcome: &ImageOutcome) -> String {
    let postures = if outcome.postures.is_empty() {
        "none".to_string()
    } else {
        outcome
            .postures
            .iter()
            .enumerate()
            .map(|(i, posture)| format!("Person {}: {}", i + 1, posture))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Pose detection complete\n\nPersons detected: {}\nAverage confidence: {:.1}%\n\nPostures:\n{}",
        outcome.stats.num_persons,
        outcome.stats.avg_confidence * 100.0,
        postures
    )
}

pub fn video_caption(outcome: &VideoOutcome) -> String {
    format!(
        "Video processed with pose detection\n\nPersons detected: {}\nDuration: {:.1}s\nFrames: {}\nFPS: {:.1}",
        outcome.persons, outcome.info.duration_secs, outcome.info.frame_count, outcome.info.fps
    )
}

pub fn clip_caption(clip_seconds: f32) -> String {
    format!("Detection clip ({clip_seconds:.0} seconds)")
}

/// Send the artifacts of `output` to every recipient. Failures are logged and
/// counted; nothing is retried and nothing already sent is withdrawn.
pub fn deliver(
    messenger: &dyn Messenger,
    recipients: &[ChatId],
    output: &PipelineOutput,
    clip_seconds: f32,
) -> DeliveryReport {
    let mut report = DeliveryReport {
        recipients: recipients.len(),
        ..DeliveryReport::default()
    };
    for &chat_id in recipients {
        match output {
            PipelineOutput::Image(outcome) => {
                let caption = image_caption(outcome);
                report.record(
                    chat_id,
                    &outcome.original,
                    messenger.send_photo(chat_id, &outcome.original, Some(ORIGINAL_IMAGE_CAPTION)),
                );
                report.record(
                    chat_id,
                    &outcome.annotated,
                    messenger.send_photo(chat_id, &outcome.annotated, Some(&caption)),
                );
                if let Some(clip) = &outcome.clip {
                    report.record(
                        chat_id,
                        clip,
                        messenger.send_video(chat_id, clip, Some(&clip_caption(clip_seconds))),
                    );
                }
            }
            PipelineOutput::Video(outcome) => {
                let caption = video_caption(outcome);
                report.record(
                    chat_id,
                    &outcome.original,
                    messenger.send_video(chat_id, &outcome.original, Some(ORIGINAL_VIDEO_CAPTION)),
                );
                report.record(
                    chat_id,
                    &outcome.annotated,
                    messenger.send_video(chat_id, &outcome.annotated, Some(&caption)),
                );
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VideoInfo;
    use crate::pose::{PoseStats, Posture};
    use crate::transport::{RecordingMessenger, Sent};

    fn image_outcome(dir: &Path) -> ImageOutcome {
        let original = dir.join("in.jpg");
        let annotated = dir.join("pose.jpg");
        std::fs::write(&original, b"a").unwrap();
        std::fs::write(&annotated, b"b").unwrap();
        ImageOutcome {
            original,
            annotated,
            clip: None,
            postures: vec![Posture::Upright, Posture::FallenCrouched],
            stats: PoseStats {
                num_persons: 2,
                total_keypoints: 34,
                avg_confidence: 0.9,
                keypoints_per_person: 17,
            },
        }
    }

    #[test]
    fn image_caption_lists_postures() {
        let dir = tempfile::tempdir().unwrap();
        let caption = image_caption(&image_outcome(dir.path()));
        assert!(caption.contains("Persons detected: 2"));
        assert!(caption.contains("Average confidence: 90.0%"));
        assert!(caption.contains("Person 1: upright\nPerson 2: fallen/crouched"));
    }

    #[test]
    fn video_caption_has_metadata() {
        let outcome = VideoOutcome {
            original: "a.gif".into(),
            annotated: "b.gif".into(),
            persons: 1,
            info: VideoInfo {
                fps: 15.0,
                width: 64,
                height: 48,
                frame_count: 30,
                duration_secs: 2.0,
            },
        };
        let caption = video_caption(&outcome);
        assert!(caption.contains("Duration: 2.0s"));
        assert!(caption.contains("Frames: 30"));
        assert!(caption.contains("FPS: 15.0"));
    }

    #[test]
    fn failed_recipient_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let output = PipelineOutput::Image(image_outcome(dir.path()));
        let messenger = RecordingMessenger::new();
        messenger.fail_chat(2);

        let report = deliver(&messenger, &[1, 2, 3], &output, 5.0);
        assert_eq!(report.recipients, 3);
        assert_eq!(report.sent, 4);
        assert_eq!(report.failed, 2);
        assert!(!report.all_sent());
        for chat in [1, 3] {
            let photos = messenger
                .sent_to(chat)
                .into_iter()
                .filter(|sent| matches!(sent, Sent::Photo { .. }))
                .count();
            assert_eq!(photos, 2);
        }
    }
}
