//! Dominant-color extraction via a coarse histogram in quantized RGB space.

use image::DynamicImage;

use super::Rgb;

/// Quantization: 4 bits per channel, 4096 buckets.
const SHIFT: u32 = 4;
const BUCKETS: usize = 1 << (3 * (8 - SHIFT));

/// Downsampled size used for counting; palettes don't need full resolution.
const SAMPLE_SIZE: u32 = 64;

/// Extract up to `k` dominant colors, most frequent first. Each returned
/// color is the mean of the pixels in its bucket, not the bucket center, so
/// muted palettes don't snap to garish quantization artifacts.
pub fn dominant_colors(img: &DynamicImage, k: usize) -> Vec<Rgb> {
    if k == 0 {
        return Vec::new();
    }

    let small = img.resize(SAMPLE_SIZE, SAMPLE_SIZE, image::imageops::FilterType::Triangle);
    let rgb = small.to_rgb8();

    // count, plus per-channel sums for the bucket mean
    let mut counts = vec![0u32; BUCKETS];
    let mut sums = vec![[0u64; 3]; BUCKETS];

    for pixel in rgb.pixels() {
        let bucket = bucket_of(pixel.0);
        counts[bucket] += 1;
        for c in 0..3 {
            sums[bucket][c] += pixel.0[c] as u64;
        }
    }

    let mut ranked: Vec<(usize, u32)> = counts
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .map(|(bucket, &count)| (bucket, count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(k)
        .map(|(bucket, count)| {
            let mut color = [0u8; 3];
            for c in 0..3 {
                color[c] = (sums[bucket][c] / count as u64) as u8;
            }
            color
        })
        .collect()
}

fn bucket_of(pixel: [u8; 3]) -> usize {
    let r = (pixel[0] >> SHIFT) as usize;
    let g = (pixel[1] >> SHIFT) as usize;
    let b = (pixel[2] >> SHIFT) as usize;
    (r << (2 * (8 - SHIFT))) | (g << (8 - SHIFT)) | b
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb as ImageRgb, RgbImage};

    #[test]
    fn test_solid_color() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, ImageRgb([200, 40, 40])));
        let palette = dominant_colors(&img, 3);
        assert_eq!(palette.len(), 1);
        assert_eq!(palette[0], [200, 40, 40]);
    }

    #[test]
    fn test_majority_color_first() {
        let mut raw = RgbImage::from_pixel(32, 32, ImageRgb([10, 10, 200]));
        // Paint a quarter of the image a second color
        for y in 0..16 {
            for x in 0..16 {
                raw.put_pixel(x, y, ImageRgb([240, 240, 240]));
            }
        }
        let palette = dominant_colors(&DynamicImage::ImageRgb8(raw), 2);
        assert_eq!(palette.len(), 2);
        assert_eq!(palette[0], [10, 10, 200]);
        assert_eq!(palette[1], [240, 240, 240]);
    }

    #[test]
    fn test_k_zero() {
        let img = DynamicImage::new_rgb8(8, 8);
        assert!(dominant_colors(&img, 0).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(32, 32, |x, y| {
            ImageRgb([(x * 8) as u8, (y * 8) as u8, 128])
        }));
        assert_eq!(dominant_colors(&img, 5), dominant_colors(&img, 5));
    }
}
