//! Shared OCR engine with lazy startup and scoped shutdown.
//!
//! The engine is an explicitly owned resource injected into the extractor at
//! construction, never a module-level singleton. The Tesseract backend and a
//! scratch workspace are acquired on the first `recognize` call and released
//! exactly once by [`OcrEngine::shutdown`]. Recognition runs one call at a
//! time: the state mutex is held across the whole call because the underlying
//! engine is not safe for concurrent recognition.

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::ImageKind;

enum EngineState {
    /// Not yet started; the first recognition boots the backend.
    Idle,
    Ready(Workspace),
    /// Shut down; further recognition is refused.
    Closed,
}

struct Workspace {
    scratch: tempfile::TempDir,
    backend_version: String,
}

pub struct OcrEngine {
    language: String,
    state: Mutex<EngineState>,
}

impl OcrEngine {
    pub fn new(language: &str) -> OcrEngine {
        OcrEngine {
            language: language.to_string(),
            state: Mutex::new(EngineState::Idle),
        }
    }

    /// Run OCR over a raster image and return the recognized text.
    ///
    /// Boots the backend on first use. Calls are serialized: the lock is held
    /// for the full recognition.
    pub async fn recognize(&self, bytes: &[u8], kind: ImageKind) -> Result<String, IngestError> {
        let mut state = self.state.lock().await;

        if matches!(*state, EngineState::Idle) {
            *state = EngineState::Ready(Self::boot().await?);
        }
        let workspace = match &*state {
            EngineState::Ready(ws) => ws,
            EngineState::Closed => {
                return Err(IngestError::Resource("ocr engine is shut down".to_string()))
            }
            EngineState::Idle => unreachable!(),
        };

        // The backend reads from disk, so stage the image in the scratch dir.
        let image_path = workspace
            .scratch
            .path()
            .join(format!("ocr-{}.{}", Uuid::new_v4(), kind.extension()));
        tokio::fs::write(&image_path, bytes)
            .await
            .map_err(|e| IngestError::Resource(format!("ocr scratch write: {}", e)))?;

        let lang = self.language.clone();
        let path = image_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let image = rusty_tesseract::Image::from_path(&path)
                .map_err(|e| IngestError::Extraction(format!("ocr image load: {}", e)))?;
            let args = rusty_tesseract::Args {
                lang,
                ..rusty_tesseract::Args::default()
            };
            rusty_tesseract::image_to_string(&image, &args)
                .map_err(|e| IngestError::Extraction(format!("ocr recognition: {}", e)))
        })
        .await
        .map_err(|e| IngestError::Resource(format!("ocr task: {}", e)))?;

        let _ = tokio::fs::remove_file(&image_path).await;
        result
    }

    async fn boot() -> Result<Workspace, IngestError> {
        let backend_version = tokio::task::spawn_blocking(|| {
            rusty_tesseract::get_tesseract_version().map(|v| v.to_string())
        })
        .await
        .map_err(|e| IngestError::Resource(format!("ocr task: {}", e)))?
        .map_err(|e| IngestError::Resource(format!("tesseract unavailable: {}", e)))?;
        let scratch = tempfile::TempDir::new()
            .map_err(|e| IngestError::Resource(format!("ocr scratch dir: {}", e)))?;
        let backend_version = backend_version.trim().to_string();
        tracing::info!(version = %backend_version, "ocr engine initialized");
        Ok(Workspace {
            scratch,
            backend_version,
        })
    }

    /// Release the scratch workspace. Runs the teardown at most once; calling
    /// again (or without a prior boot) is a no-op.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let EngineState::Ready(ws) = std::mem::replace(&mut *state, EngineState::Closed) {
            tracing::info!(version = %ws.backend_version, "ocr engine shut down");
            if let Err(e) = ws.scratch.close() {
                tracing::warn!("failed to remove ocr scratch dir: {}", e);
            }
        }
    }

    /// Whether the backend has been booted (and not shut down).
    pub async fn is_initialized(&self) -> bool {
        matches!(&*self.state.lock().await, EngineState::Ready(_))
    }
}
