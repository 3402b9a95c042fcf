//! Call boundary into the deep dream renderer.
//!
//! The renderer itself is an external collaborator: it receives a decoded
//! float image and writes the transformed result to a path. The adapter
//! hands it a staging path and moves the result over the destination only
//! when the render succeeds. This crate owns only the seam, the timing and
//! the failure translation.

use std::{
    fs,
    io::{self, Cursor},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use image::{DynamicImage, ImageFormat, Rgb32FImage};
use thiserror::Error;
use tracing::{debug, warn};

mod process;

pub use process::ProcessEngine;

/// A blocking deep dream implementation.
///
/// Implementations may take seconds to minutes per call; they are always run
/// on the blocking thread pool.
pub trait DeepDreamEngine: Send + Sync {
    fn render(
        &self,
        image: &Rgb32FImage,
        destination: &Path,
        layer: &str,
        unit: u32,
    ) -> anyhow::Result<()>;
}

impl<F> DeepDreamEngine for F
where
    F: Fn(&Rgb32FImage, &Path, &str, u32) -> anyhow::Result<()> + Send + Sync,
{
    fn render(
        &self,
        image: &Rgb32FImage,
        destination: &Path,
        layer: &str,
        unit: u32,
    ) -> anyhow::Result<()> {
        self(image, destination, layer, unit)
    }
}

pub struct MissingEngine;

impl DeepDreamEngine for MissingEngine {
    fn render(
        &self,
        _image: &Rgb32FImage,
        _destination: &Path,
        layer: &str,
        unit: u32,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!(
            "no render engine configured (layer {layer}, unit {unit})"
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct RenderFailed {
    pub reason: String,
}

impl RenderFailed {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub image: Rgb32FImage,
    pub destination: PathBuf,
    pub layer: String,
    pub unit: u32,
}

#[derive(Clone)]
pub struct RenderAdapter {
    engine: Arc<dyn DeepDreamEngine>,
}

impl RenderAdapter {
    pub fn new(engine: Arc<dyn DeepDreamEngine>) -> Self {
        Self { engine }
    }

    /// Runs one render to completion and returns how long it took.
    pub async fn render(&self, request: RenderRequest) -> Result<Duration, RenderFailed> {
        let engine = Arc::clone(&self.engine);
        let RenderRequest {
            image,
            destination,
            layer,
            unit,
        } = request;

        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = render_staged(engine.as_ref(), &image, &destination, &layer, unit);
            debug!(%layer, unit, destination = %destination.display(), ok = result.is_ok(), "render finished");
            result
        })
        .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(())) => Ok(elapsed),
            Ok(Err(error)) => Err(RenderFailed::new(format!("{error:#}"))),
            Err(join_error) if join_error.is_panic() => {
                Err(RenderFailed::new("render engine panicked"))
            }
            Err(join_error) => Err(RenderFailed::new(join_error.to_string())),
        }
    }
}

/// Path the engine writes to before the result replaces `destination`.
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    destination.with_file_name(name)
}

// The destination is only replaced once the engine has succeeded and left a
// complete file behind; a failed render leaves it untouched.
fn render_staged(
    engine: &dyn DeepDreamEngine,
    image: &Rgb32FImage,
    destination: &Path,
    layer: &str,
    unit: u32,
) -> anyhow::Result<()> {
    let staging = staging_path(destination);
    discard(&staging);

    let rendered = engine.render(image, &staging, layer, unit).and_then(|()| {
        if !staging.is_file() {
            anyhow::bail!("render engine did not write {}", staging.display());
        }
        fs::rename(&staging, destination).with_context(|| {
            format!("failed to move render output to {}", destination.display())
        })
    });
    if rendered.is_err() {
        discard(&staging);
    }
    rendered
}

fn discard(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), %error, "failed to remove partial render output");
        }
    }
}

/// Decodes an encoded image (JPEG, PNG) into the float buffer the engine expects.
pub fn decode_image(bytes: &[u8]) -> Result<Rgb32FImage, RenderFailed> {
    image::load_from_memory(bytes)
        .map(DynamicImage::into_rgb32f)
        .map_err(|error| RenderFailed::new(format!("failed to decode image: {error}")))
}

pub(crate) fn encode_png(image: &Rgb32FImage) -> anyhow::Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb32F(image.clone()).into_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb).write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
