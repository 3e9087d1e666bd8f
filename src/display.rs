//! Display surface for the camera preview.
//!
//! The surface models a single UI image: what it shows (nothing, the live
//! stream, or an annotated texture), its tint, the orientation applied to
//! match the sensor, and the rect transform that letterboxes the image inside
//! its parent viewport.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Reported capture sizes at or below this are placeholders, not real frames.
pub const DEGENERATE_DIMENSION: u32 = 16;

/// Viewport (screen) size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Per-axis scale applied to the image rect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitScale {
    pub x: f32,
    pub y: f32,
}

impl FitScale {
    pub const IDENTITY: FitScale = FitScale { x: 1.0, y: 1.0 };
}

/// Fit an image of `cam_aspect` inside a viewport of `screen_aspect` without
/// cropping. The relatively longer side keeps scale 1; the other shrinks.
pub fn fit_scale(cam_aspect: f32, screen_aspect: f32) -> FitScale {
    if cam_aspect > screen_aspect {
        FitScale {
            x: 1.0,
            y: screen_aspect / cam_aspect,
        }
    } else {
        FitScale {
            x: cam_aspect / screen_aspect,
            y: 1.0,
        }
    }
}

/// Camera aspect used for fitting.
///
/// Falls back per axis to the requested size while the stream still reports a
/// placeholder size, and inverts the aspect for sensors rotated a quarter turn.
pub fn camera_aspect(
    reported: (u32, u32),
    requested: (u32, u32),
    rotation_degrees: i32,
) -> f32 {
    let width = if reported.0 > DEGENERATE_DIMENSION {
        reported.0
    } else {
        requested.0
    };
    let height = if reported.1 > DEGENERATE_DIMENSION {
        reported.1
    } else {
        requested.1
    };
    let aspect = width as f32 / height as f32;
    if rotation_degrees.rem_euclid(180) != 0 {
        1.0 / aspect
    } else {
        aspect
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tint {
    #[default]
    White,
    Black,
}

/// Rotation and mirroring that undo the sensor's mounting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    /// Rotation about the view axis, degrees.
    pub rotation_z: f32,
    pub mirrored: bool,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            rotation_z: 0.0,
            mirrored: false,
        }
    }
}

/// Layout of the image rect inside its parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectTransform {
    pub anchor_min: (f32, f32),
    pub anchor_max: (f32, f32),
    pub anchored_position: (f32, f32),
    pub size_delta: (f32, f32),
    pub scale: FitScale,
}

impl RectTransform {
    /// Stretch to fill the parent; only `scale` letterboxes.
    pub fn stretched(scale: FitScale) -> Self {
        Self {
            anchor_min: (0.0, 0.0),
            anchor_max: (1.0, 1.0),
            anchored_position: (0.0, 0.0),
            size_delta: (0.0, 0.0),
            scale,
        }
    }
}

impl Default for RectTransform {
    fn default() -> Self {
        Self::stretched(FitScale::IDENTITY)
    }
}

/// RGB24 pixel texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Texture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; rgb24_len(width, height)],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the pixel contents. The length must match exactly.
    pub fn load_raw_data(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.data.len() {
            return Err(anyhow!(
                "texture {}x{} expects {} bytes, got {}",
                self.width,
                self.height,
                self.data.len(),
                bytes.len()
            ));
        }
        self.data.copy_from_slice(bytes);
        Ok(())
    }
}

/// Byte length of a tightly packed RGB24 image.
pub fn rgb24_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// What the display currently samples from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TextureSource {
    #[default]
    None,
    /// The live stream of the named device.
    Stream(String),
    Annotated,
}

/// The preview image.
#[derive(Debug, Default)]
pub struct DisplaySurface {
    source: TextureSource,
    annotated: Option<Texture>,
    tint: Tint,
    error: Option<String>,
    orientation: Orientation,
    rect: RectTransform,
}

impl DisplaySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> &TextureSource {
        &self.source
    }

    pub fn tint(&self) -> Tint {
        self.tint
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn rect(&self) -> RectTransform {
        self.rect
    }

    /// Annotated texture, once one has been presented.
    pub fn annotated(&self) -> Option<&Texture> {
        self.annotated.as_ref()
    }

    /// Combined local scale: letterbox scale with the mirror flip on Y.
    pub fn local_scale(&self) -> (f32, f32, f32) {
        let flip = if self.orientation.mirrored { -1.0 } else { 1.0 };
        (self.rect.scale.x, self.rect.scale.y * flip, 1.0)
    }

    pub fn bind_stream(&mut self, device_name: &str) {
        self.source = TextureSource::Stream(device_name.to_string());
    }

    pub fn clear_source(&mut self) {
        self.source = TextureSource::None;
    }

    /// Black out the image and remember why.
    pub fn show_error(&mut self, message: &str) {
        self.tint = Tint::Black;
        self.error = Some(message.to_string());
    }

    pub fn set_orientation(&mut self, rotation_degrees: i32, mirrored: bool) {
        self.orientation = Orientation {
            rotation_z: -(rotation_degrees as f32),
            mirrored,
        };
    }

    pub fn set_fit(&mut self, scale: FitScale) {
        self.rect = RectTransform::stretched(scale);
    }

    /// Show an annotated frame. Rejects buffers of the wrong length without
    /// touching the current image.
    pub fn present_annotated(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        if pixels.len() != rgb24_len(width, height) {
            return Err(anyhow!(
                "annotated frame has {} bytes, expected {} for {}x{}",
                pixels.len(),
                rgb24_len(width, height),
                width,
                height
            ));
        }
        let mut texture = self
            .annotated
            .take()
            .filter(|texture| texture.width == width && texture.height == height)
            .unwrap_or_else(|| Texture::new(width, height));
        texture.load_raw_data(pixels)?;
        self.annotated = Some(texture);
        self.source = TextureSource::Annotated;
        Ok(())
    }

    /// Write the annotated texture to an image file (format from extension).
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let texture = self
            .annotated
            .as_ref()
            .ok_or_else(|| anyhow!("no annotated frame has been presented"))?;
        image::save_buffer(
            path,
            texture.data(),
            texture.width,
            texture.height,
            image::ColorType::Rgb8,
        )
        .with_context(|| format!("failed to write snapshot {}", path.display()))
    }
}
