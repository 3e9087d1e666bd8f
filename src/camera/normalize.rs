use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"NV12" => Some(Self::Nv12),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }
}

/// Convert a captured buffer to tightly packed RGB24, writing into `rgb`.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    rgb: &mut Vec<u8>,
) -> Result<()> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    rgb.resize(plane * 3, 0);
    match format {
        PixelFormat::Rgb24 => {
            let expected = plane * 3;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            rgb.copy_from_slice(&pixels[..expected]);
        }
        PixelFormat::Nv12 => {
            // Interleaved UV plane at half resolution, rounded up for odd sizes.
            let uv_stride = w.div_ceil(2) * 2;
            let expected = plane + uv_stride * h.div_ceil(2);
            if pixels.len() < expected {
                return Err(anyhow!(
                    "NV12 frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            for j in 0..h {
                for i in 0..w {
                    let y = pixels[j * w + i];
                    let uv_index = plane + (j / 2) * uv_stride + (i / 2) * 2;
                    let offset = (j * w + i) * 3;
                    write_yuv(&mut rgb[offset..offset + 3], y, pixels[uv_index], pixels[uv_index + 1]);
                }
            }
        }
        PixelFormat::Yuyv => {
            let expected = plane * 2;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "YUYV frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            // Each 4-byte group Y0 U Y1 V covers two pixels.
            for (pair, group) in pixels[..expected].chunks_exact(4).enumerate() {
                let offset = pair * 6;
                write_yuv(&mut rgb[offset..offset + 3], group[0], group[1], group[3]);
                write_yuv(&mut rgb[offset + 3..offset + 6], group[2], group[1], group[3]);
            }
        }
    }
    Ok(())
}

fn write_yuv(out: &mut [u8], y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    out[0] = clamp_to_u8(y + 1.402_f32 * v);
    out[1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
    out[2] = clamp_to_u8(y + 1.772_f32 * u);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let mut rgb = Vec::new();
        normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12, &mut rgb)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn nv12_odd_dimensions_round_chroma_up() -> Result<()> {
        let mut rgb = Vec::new();
        // 3x3 luma plus a 2x2 grid of UV pairs.
        let nv12 = [vec![128u8; 9], vec![128u8; 8]].concat();
        normalize_to_rgb(&nv12, 3, 3, PixelFormat::Nv12, &mut rgb)?;
        assert_eq!(rgb, vec![128u8; 27]);

        assert!(normalize_to_rgb(&nv12[..13], 3, 3, PixelFormat::Nv12, &mut rgb).is_err());
        assert!(normalize_to_rgb(&nv12[..16], 3, 3, PixelFormat::Nv12, &mut rgb).is_err());
        Ok(())
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![128u8; 2 * 2 * 2];
        let mut rgb = Vec::new();
        normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv, &mut rgb)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() -> Result<()> {
        let pixels = vec![1u8; 9];
        let mut rgb = Vec::new();
        normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24, &mut rgb)?;
        assert_eq!(rgb, pixels);
        assert!(normalize_to_rgb(&pixels[..8], 1, 3, PixelFormat::Rgb24, &mut rgb).is_err());
        Ok(())
    }

    #[test]
    fn maps_known_fourccs() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
