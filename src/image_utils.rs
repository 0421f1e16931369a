use image::{GrayImage, Luma, Rgb, RgbImage};

/// Per-channel 256-bin histograms, indexed [R, G, B]
pub type ChannelHistograms = [[u64; 256]; 3];

/// Resize an image to the specified [width, height]
pub fn resize_image(
    image: &RgbImage,
    dimensions: [u32; 2],
    filter: image::imageops::FilterType,
) -> RgbImage {
    let (width, height) = (dimensions[0], dimensions[1]);
    image::imageops::resize(image, width, height, filter)
}

/// Convert one RGB pixel to HSV on the OpenCV 8-bit scale:
/// H in 0..=180 (degrees / 2), S and V in 0..=255
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let r = pixel[0] as f32;
    let g = pixel[1] as f32;
    let b = pixel[2] as f32;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        (h / 2.0).round().min(180.0) as u8,
        s.round().min(255.0) as u8,
        v as u8,
    ]
}

/// Luma of one RGB pixel with BT.601 weights
#[inline]
pub fn luma(pixel: &Rgb<u8>) -> u8 {
    let y = 0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32;
    y.round().min(255.0) as u8
}

/// Grayscale copy of an RGB image (BT.601 luma)
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| Luma([luma(image.get_pixel(x, y))]))
}

/// Build per-channel histograms over the pixels accepted by `include`
pub fn channel_histograms<F>(image: &RgbImage, include: F) -> ChannelHistograms
where
    F: Fn(&Rgb<u8>) -> bool,
{
    let mut histograms = [[0u64; 256]; 3];

    for pixel in image.pixels().filter(|p| include(p)) {
        for (channel, histogram) in histograms.iter_mut().enumerate() {
            histogram[pixel[channel] as usize] += 1;
        }
    }

    histograms
}

/// Mean and standard deviation of the values counted in a histogram.
/// Returns None for an empty histogram.
pub fn histogram_mean_std(histogram: &[u64; 256]) -> Option<(f64, f64)> {
    let count: u64 = histogram.iter().sum();
    if count == 0 {
        return None;
    }

    let n = count as f64;
    let mean = histogram
        .iter()
        .enumerate()
        .map(|(value, &c)| value as f64 * c as f64)
        .sum::<f64>()
        / n;
    let variance = histogram
        .iter()
        .enumerate()
        .map(|(value, &c)| (value as f64 - mean).powi(2) * c as f64)
        .sum::<f64>()
        / n;

    Some((mean, variance.sqrt()))
}
