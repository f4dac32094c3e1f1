//! Turns view models into terminal lines, printing only what changed.

use std::collections::HashMap;

use chrono::{Local, TimeZone};
use stacky_core::{ChatViewModel, DebugAccessView, Message, MessageId, PhotoStage, Sender};
use stacky_engine::is_blob_url;

#[derive(Default)]
pub(crate) struct Renderer {
    shown: HashMap<MessageId, Option<String>>,
    last_status: Vec<String>,
}

impl Renderer {
    pub(crate) fn render(&mut self, view: &ChatViewModel) -> Vec<String> {
        let mut lines = Vec::new();
        for message in &view.messages {
            let image = message.display_image().map(str::to_string);
            match self.shown.get(&message.id) {
                None => lines.extend(format_message(message)),
                Some(previous) if *previous != image => {
                    // An inline copy replacing a released preview is not news.
                    if let Some(url) = image.as_deref().filter(|url| !url.starts_with("data:")) {
                        lines.push(format!("  [photo #{} saved: {}]", message.id, url));
                    }
                }
                Some(_) => {}
            }
            self.shown.insert(message.id, image);
        }

        let status = status_lines(view);
        if status != self.last_status {
            lines.extend(status.iter().cloned());
            self.last_status = status;
        }
        lines
    }
}

fn format_message(message: &Message) -> Vec<String> {
    let time = Local
        .timestamp_millis_opt(message.timestamp_ms)
        .single()
        .map(|local| local.format("%H:%M").to_string())
        .unwrap_or_default();
    let who = match message.sender {
        Sender::User => "You",
        Sender::Assistant => "Stacky",
    };
    let mut lines = vec![format!("[{time}] {who}: {}", message.text)];
    if let Some(image) = message.display_image() {
        if is_blob_url(image) {
            lines.push("  [photo preview]".to_string());
        } else if image.starts_with("data:") {
            lines.push("  [inline photo]".to_string());
        } else {
            lines.push(format!("  [photo: {image}]"));
        }
    }
    lines.extend(message.structured_questions.iter().map(|q| format!("  ? {q}")));
    lines.extend(message.next_steps.iter().map(|step| format!("  -> {step}")));
    lines
}

fn status_lines(view: &ChatViewModel) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(error) = &view.error {
        lines.push(format!("! {error}  (/dismiss)"));
    }
    if let Some(retry) = &view.retry {
        lines.push(format!(
            "... retrying (attempt {}/{}), /cancel to stop",
            retry.attempt, retry.max_retries
        ));
    } else if view.is_loading {
        lines.push("... Stacky is typing".to_string());
    }
    for photo in &view.photos {
        match photo.stage {
            PhotoStage::Uploading => lines.push(format!("... uploading photo {}", photo.photo_id)),
            PhotoStage::UploadFailed => lines.push(format!(
                "! photo {} upload failed: {}  (/retry-photo {})",
                photo.photo_id,
                photo.error.as_deref().unwrap_or("unknown error"),
                photo.photo_id
            )),
            PhotoStage::Staged | PhotoStage::Uploaded => {}
        }
    }
    match &view.debug {
        DebugAccessView::Locked => {}
        DebugAccessView::Checking => lines.push("... checking debug password".to_string()),
        DebugAccessView::GrantedPendingRestart => {
            lines.push("debug access granted, restart to enable the debug bus".to_string())
        }
        DebugAccessView::Denied(error) => lines.push(format!("! debug login failed: {error}")),
    }
    lines
}

#[cfg(test)]
mod tests {
    use stacky_core::{PhotoView, RetryView};

    use super::*;

    fn view_with(messages: Vec<Message>) -> ChatViewModel {
        ChatViewModel {
            messages,
            ..ChatViewModel::default()
        }
    }

    #[test]
    fn only_new_messages_are_printed() {
        let mut renderer = Renderer::default();
        let first = Message::user(1, "hello", 0);
        let lines = renderer.render(&view_with(vec![first.clone()]));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("You: hello"));

        let mut reply = Message::assistant(2, "hi!", 0);
        reply.next_steps = vec!["Pack the item".into()];
        let lines = renderer.render(&view_with(vec![first, reply]));
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Stacky: hi!"));
        assert_eq!(lines[1], "  -> Pack the item");
    }

    #[test]
    fn photo_swap_is_announced() {
        let mut renderer = Renderer::default();
        let mut photo = Message::user(1, "Photo", 0);
        photo.blob_url = Some("blob:stacky/abc".into());
        let lines = renderer.render(&view_with(vec![photo.clone()]));
        assert_eq!(lines[1], "  [photo preview]");

        photo.blob_url = None;
        photo.s3_url = Some("https://s3/a.jpg".into());
        let lines = renderer.render(&view_with(vec![photo]));
        assert_eq!(lines, vec!["  [photo #1 saved: https://s3/a.jpg]".to_string()]);
    }

    #[test]
    fn released_preview_falls_back_quietly() {
        let mut renderer = Renderer::default();
        let mut photo = Message::user(1, "Photo", 0);
        photo.blob_url = Some("blob:stacky/abc".into());
        photo.image = Some("data:image/png;base64,aGk=".into());
        renderer.render(&view_with(vec![photo.clone()]));

        photo.blob_url = None;
        assert!(renderer.render(&view_with(vec![photo])).is_empty());
    }

    #[test]
    fn status_is_printed_when_it_changes() {
        let mut renderer = Renderer::default();
        let view = ChatViewModel {
            is_loading: true,
            retry: Some(RetryView {
                op_id: 1,
                attempt: 2,
                max_retries: 3,
            }),
            photos: vec![PhotoView {
                photo_id: 4,
                message_id: 1,
                stage: PhotoStage::UploadFailed,
                error: Some("timeout".into()),
            }],
            ..ChatViewModel::default()
        };
        let lines = renderer.render(&view);
        assert_eq!(
            lines,
            vec![
                "... retrying (attempt 2/3), /cancel to stop".to_string(),
                "! photo 4 upload failed: timeout  (/retry-photo 4)".to_string(),
            ]
        );
        assert!(renderer.render(&view).is_empty());
    }
}
