//! Process-local photo previews addressed by `blob:` URLs.
//!
//! Mirrors the object-URL lifecycle of a browser: a preview exists from
//! [`PreviewStore::create_object_url`] until [`PreviewStore::revoke`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine as _;
use bytes::Bytes;

pub const BLOB_SCHEME_PREFIX: &str = "blob:stacky/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub bytes: Bytes,
    pub mime: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewEvent {
    Created {
        blob_url: String,
        mime: String,
        size: usize,
    },
    Revoked {
        blob_url: String,
    },
}

pub trait PreviewObserver: Send + Sync {
    fn on_preview_event(&self, event: &PreviewEvent);
}

#[derive(Clone, Default)]
pub struct PreviewStore {
    previews: Arc<Mutex<HashMap<String, Preview>>>,
    observers: Vec<Arc<dyn PreviewObserver>>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn PreviewObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn create_object_url(
        &self,
        bytes: impl Into<Bytes>,
        mime: impl Into<String>,
        file_name: impl Into<String>,
    ) -> String {
        let preview = Preview {
            bytes: bytes.into(),
            mime: mime.into(),
            file_name: file_name.into(),
        };
        let blob_url = format!("{BLOB_SCHEME_PREFIX}{}", uuid::Uuid::new_v4());
        let event = PreviewEvent::Created {
            blob_url: blob_url.clone(),
            mime: preview.mime.clone(),
            size: preview.bytes.len(),
        };
        self.lock().insert(blob_url.clone(), preview);
        self.notify(&event);
        blob_url
    }

    pub fn get(&self, blob_url: &str) -> Option<Preview> {
        self.lock().get(blob_url).cloned()
    }

    /// Frees the preview. Returns whether it existed.
    pub fn revoke(&self, blob_url: &str) -> bool {
        let removed = self.lock().remove(blob_url).is_some();
        if removed {
            self.notify(&PreviewEvent::Revoked {
                blob_url: blob_url.to_string(),
            });
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inline form for endpoints that take the image in the request body.
    pub fn data_url(&self, blob_url: &str) -> Option<String> {
        self.get(blob_url).map(|preview| {
            format!(
                "data:{};base64,{}",
                preview.mime,
                base64::engine::general_purpose::STANDARD.encode(&preview.bytes)
            )
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Preview>> {
        self.previews.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: &PreviewEvent) {
        for observer in &self.observers {
            observer.on_preview_event(event);
        }
    }
}

pub fn is_blob_url(reference: &str) -> bool {
    reference.starts_with(BLOB_SCHEME_PREFIX)
}

/// Guesses an image MIME type from the file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PreviewEvent>>);

    impl PreviewObserver for Recorder {
        fn on_preview_event(&self, event: &PreviewEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn object_url_lifecycle_is_observed() {
        let recorder = Arc::new(Recorder::default());
        let store = PreviewStore::new().with_observer(recorder.clone());

        let url = store.create_object_url(vec![1u8, 2, 3], "image/png", "a.png");
        assert!(is_blob_url(&url));
        assert_eq!(store.get(&url).unwrap().bytes.as_ref(), &[1, 2, 3]);

        assert!(store.revoke(&url));
        assert!(!store.revoke(&url));
        assert!(store.is_empty());

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                PreviewEvent::Created {
                    blob_url: url.clone(),
                    mime: "image/png".into(),
                    size: 3,
                },
                PreviewEvent::Revoked { blob_url: url },
            ]
        );
    }

    #[test]
    fn data_url_encodes_bytes() {
        let store = PreviewStore::new();
        let url = store.create_object_url(&b"hi"[..], "image/jpeg", "x.jpg");
        assert_eq!(store.data_url(&url).unwrap(), "data:image/jpeg;base64,aGk=");
        assert_eq!(store.data_url("blob:stacky/missing"), None);
    }

    #[test]
    fn mime_guess_uses_extension() {
        assert_eq!(mime_for_path(Path::new("box.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("label.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("noext")), "image/jpeg");
    }
}
