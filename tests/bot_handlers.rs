use image::{Rgb, RgbImage};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pose_relay::bot::commands::{
    ALREADY_SUBSCRIBED_TEXT, DENIED_TEXT, DOCUMENT_TEXT, PLAIN_TEXT_HINT, PROCESSING_IMAGE_TEXT,
    RECEIVED_TEXT, SENDING_TEXT, SUBSCRIBED_TEXT, WELCOME_TEXT,
};
use pose_relay::bot::{run_polling, BotService, UpdateSource};
use pose_relay::config::{ClipFormat, ClipSettings, PathSettings};
use pose_relay::media;
use pose_relay::pose::{PoseDetector, SimulatedBackend, Topology};
use pose_relay::transport::{Sent, Update};
use pose_relay::{
    ClipRenderer, InMemorySubscriberStore, RecordingMessenger, RequestPipeline, SubscriberStore,
    UsageStats,
};

const CHAT: i64 = 5;
const USER: i64 = 9;

struct Harness {
    messenger: Arc<RecordingMessenger>,
    subscribers: Arc<InMemorySubscriberStore>,
    service: BotService,
    _dir: tempfile::TempDir,
}

fn harness(allowed_users: Vec<i64>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = PathSettings::under(dir.path());
    paths.ensure_dirs().unwrap();
    let detector = PoseDetector::new(Box::new(SimulatedBackend::new(Topology::Coco17)), 0.3);
    let clip = ClipSettings {
        fps: 4,
        duration_secs: 1.0,
        format: ClipFormat::Gif,
    };
    let renderer = ClipRenderer::new(&clip, paths.videos_dir());
    let pipeline = RequestPipeline::new(detector, renderer, &paths);

    let messenger = Arc::new(RecordingMessenger::new());
    let subscribers = Arc::new(InMemorySubscriberStore::new());
    let service = BotService::new(
        messenger.clone(),
        pipeline,
        subscribers.clone(),
        Arc::new(UsageStats::new()),
        paths.detections_dir(),
    )
    .with_allowed_users(allowed_users)
    .with_bot_username(Some("posebot".to_string()));
    Harness {
        messenger,
        subscribers,
        service,
        _dir: dir,
    }
}

fn update(value: serde_json::Value) -> Update {
    serde_json::from_value(value).expect("valid update")
}

fn text_update(id: i64, user: i64, text: &str) -> Update {
    update(json!({
        "update_id": id,
        "message": {
            "message_id": id * 10,
            "chat": { "id": CHAT },
            "from": { "id": user, "first_name": "Test" },
            "text": text,
        }
    }))
}

fn texts(sent: &[Sent]) -> Vec<String> {
    sent.iter()
        .filter_map(|s| match s {
            Sent::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn write_photo(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("upload.png");
    media::save_image(&path, &RgbImage::from_pixel(64, 48, Rgb([120, 80, 40]))).unwrap();
    path
}

#[test]
fn subscribe_twice_stores_chat_once() {
    let mut h = harness(Vec::new());
    h.service.handle_update(&text_update(1, USER, "/subscribe")).unwrap();
    h.service.handle_update(&text_update(2, USER, "/subscribe@posebot")).unwrap();

    assert_eq!(h.subscribers.list().unwrap(), vec![CHAT]);
    assert_eq!(
        texts(&h.messenger.sent()),
        vec![SUBSCRIBED_TEXT.to_string(), ALREADY_SUBSCRIBED_TEXT.to_string()]
    );

    h.service.handle_update(&text_update(3, USER, "/unsubscribe")).unwrap();
    assert!(h.subscribers.list().unwrap().is_empty());
}

#[test]
fn start_offers_buttons_and_plain_text_gets_hint() {
    let mut h = harness(Vec::new());
    h.service.handle_update(&text_update(1, USER, "/start")).unwrap();
    h.service.handle_update(&text_update(2, USER, "hello there")).unwrap();
    h.service.handle_update(&text_update(3, USER, "/start@otherbot")).unwrap();

    let sent = h.messenger.sent();
    assert_eq!(sent.len(), 2);
    match &sent[0] {
        Sent::Text { text, buttons, .. } => {
            assert_eq!(text, WELCOME_TEXT);
            let data: Vec<&str> = buttons.iter().map(|b| b.callback_data.as_str()).collect();
            assert_eq!(data, vec!["stats", "help"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(texts(&sent[1..]), vec![PLAIN_TEXT_HINT.to_string()]);
}

#[test]
fn stats_button_reports_counters() {
    let mut h = harness(Vec::new());
    let callback = update(json!({
        "update_id": 4,
        "callback_query": {
            "id": "cb-1",
            "from": { "id": USER },
            "message": { "message_id": 3, "chat": { "id": CHAT } },
            "data": "stats",
        }
    }));
    h.service.handle_update(&callback).unwrap();

    let sent = h.messenger.sent();
    assert!(matches!(&sent[0], Sent::CallbackAnswer { callback_id, .. } if callback_id == "cb-1"));
    let reply = texts(&sent);
    assert_eq!(reply.len(), 1);
    assert!(reply[0].contains("Images processed: 0"));
    assert!(reply[0].contains("simulated"));
}

#[test]
fn documents_are_rejected() {
    let mut h = harness(Vec::new());
    let doc = update(json!({
        "update_id": 7,
        "message": {
            "message_id": 70,
            "chat": { "id": CHAT },
            "from": { "id": USER },
            "document": { "file_id": "doc-1", "file_name": "clip.mp4" },
        }
    }));
    h.service.handle_update(&doc).unwrap();
    assert_eq!(texts(&h.messenger.sent()), vec![DOCUMENT_TEXT.to_string()]);
}

#[test]
fn users_outside_allow_list_are_denied() {
    let mut h = harness(vec![USER]);
    h.service.handle_update(&text_update(1, 1234, "/subscribe")).unwrap();
    assert_eq!(texts(&h.messenger.sent()), vec![DENIED_TEXT.to_string()]);
    assert!(h.subscribers.list().unwrap().is_empty());

    h.messenger.clear();
    h.service.handle_update(&text_update(2, USER, "/subscribe")).unwrap();
    assert_eq!(h.subscribers.list().unwrap(), vec![CHAT]);
}

#[test]
fn photo_gets_original_annotated_and_clip() {
    let mut h = harness(Vec::new());
    let source = write_photo(h._dir.path());
    h.messenger.register_file("large", &source);
    let photo = update(json!({
        "update_id": 11,
        "message": {
            "message_id": 110,
            "chat": { "id": CHAT },
            "from": { "id": USER },
            "photo": [
                { "file_id": "thumb", "width": 32, "height": 24 },
                { "file_id": "large", "width": 64, "height": 48 },
            ],
        }
    }));
    h.service.handle_update(&photo).unwrap();

    let sent = h.messenger.sent_to(CHAT);
    assert!(matches!(&sent[0], Sent::Text { text, .. } if text == RECEIVED_TEXT));
    assert!(matches!(&sent[1], Sent::Edit { text, .. } if text == PROCESSING_IMAGE_TEXT));
    assert!(matches!(&sent[2], Sent::Edit { text, .. } if text == SENDING_TEXT));

    let photos: Vec<&Sent> = sent.iter().filter(|s| matches!(s, Sent::Photo { .. })).collect();
    let videos: Vec<&Sent> = sent.iter().filter(|s| matches!(s, Sent::Video { .. })).collect();
    assert_eq!(photos.len(), 2);
    assert_eq!(videos.len(), 1);
    if let Sent::Photo { caption, .. } = photos[1] {
        assert!(caption.as_deref().unwrap_or("").contains("Persons detected: 1"));
    }
    if let Sent::Video { path, .. } = videos[0] {
        assert_eq!(media::probe(path).unwrap().frame_count, 4);
    }
    assert!(matches!(sent.last(), Some(Sent::Delete { .. })));

    let snapshot = h.service.stats().snapshot();
    assert_eq!(snapshot.total_images, 1);
    assert_eq!(snapshot.total_persons_detected, 1);
}

#[test]
fn failed_download_turns_status_into_error() {
    let mut h = harness(Vec::new());
    let photo = update(json!({
        "update_id": 12,
        "message": {
            "message_id": 120,
            "chat": { "id": CHAT },
            "from": { "id": USER },
            "photo": [{ "file_id": "missing", "width": 64, "height": 48 }],
        }
    }));
    h.service.handle_update(&photo).unwrap();

    let sent = h.messenger.sent_to(CHAT);
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[1], Sent::Edit { text, .. } if text.starts_with("Error:")));
    assert_eq!(h.service.stats().snapshot().total_images, 0);
}

struct ScriptedSource {
    batches: Mutex<Vec<Vec<Update>>>,
    offsets: Mutex<Vec<Option<i64>>>,
    shutdown: Arc<AtomicBool>,
}

impl UpdateSource for ScriptedSource {
    fn poll(&self, offset: Option<i64>, _timeout: Duration) -> anyhow::Result<Vec<Update>> {
        self.offsets.lock().unwrap().push(offset);
        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
            return Ok(Vec::new());
        }
        Ok(batches.remove(0))
    }
}

#[test]
fn polling_advances_offset_past_handled_updates() {
    let mut h = harness(Vec::new());
    let shutdown = Arc::new(AtomicBool::new(false));
    let source = ScriptedSource {
        batches: Mutex::new(vec![
            vec![text_update(40, USER, "/help"), text_update(41, USER, "/stats")],
            vec![text_update(42, USER, "/subscribe")],
        ]),
        offsets: Mutex::new(Vec::new()),
        shutdown: shutdown.clone(),
    };

    run_polling(&source, &mut h.service, Duration::from_secs(1), &shutdown).unwrap();

    assert_eq!(
        *source.offsets.lock().unwrap(),
        vec![None, Some(42), Some(43)]
    );
    assert_eq!(texts(&h.messenger.sent()).len(), 3);
    assert_eq!(h.subscribers.list().unwrap(), vec![CHAT]);
}
