//! Key image compositing: game icon background with the player count on top.
//!
//! Text is drawn with ProFont bitmap glyphs through embedded-graphics onto an
//! RGBA layer, then scaled up with nearest-neighbour so it stays crisp on the
//! key's LCD.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::renderer::TextRenderer;
use embedded_graphics::text::{Baseline, Text};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use log::debug;
use profont::{PROFONT_10_POINT, PROFONT_14_POINT, PROFONT_18_POINT, PROFONT_24_POINT};
use std::convert::Infallible;
use std::io::Cursor;

pub const KEY_IMAGE_SIZE: u32 = 144;

/// Manifest image shown for keys that have no resolvable place.
pub const PLACEHOLDER_RESOURCE: &str = "imgs/actions/player-count/icon";

const TEXT_MARGIN: u32 = 8;
const MAX_TEXT_SCALE: u32 = 3;
const ICON_BLUR_SIGMA: f32 = 1.5;
const ICON_BRIGHTNESS: f32 = 0.6;
const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([0x1f, 0x22, 0x2a, 0xff]);

/// Largest first.
const FONTS: [&MonoFont<'static>; 4] = [
    &PROFONT_24_POINT,
    &PROFONT_18_POINT,
    &PROFONT_14_POINT,
    &PROFONT_10_POINT,
];

const OUTLINE_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// What gets shown on a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyImage {
    /// `data:image/png;base64,...`
    Encoded(String),
    /// Image path relative to the plugin directory, without extension.
    Resource(String),
}

impl KeyImage {
    pub fn placeholder() -> Self {
        KeyImage::Resource(PLACEHOLDER_RESOURCE.to_string())
    }
}

pub trait Compositor: Send + Sync + 'static {
    /// Draws `text` over `icon`. A missing or undecodable icon gets a flat
    /// background instead; the result depends only on the inputs.
    fn render(&self, icon: Option<&[u8]>, text: &str) -> Result<KeyImage>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BitmapCompositor;

impl Compositor for BitmapCompositor {
    fn render(&self, icon: Option<&[u8]>, text: &str) -> Result<KeyImage> {
        let text = if text.is_empty() { " " } else { text };

        let mut canvas = background(icon);
        draw_centered_text(&mut canvas, text);

        let mut png = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("Failed to encode key image")?;

        Ok(KeyImage::Encoded(format!(
            "data:image/png;base64,{}",
            STANDARD.encode(&png)
        )))
    }
}

fn background(icon: Option<&[u8]>) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(KEY_IMAGE_SIZE, KEY_IMAGE_SIZE, PLACEHOLDER_BACKGROUND);

    let decoded = icon
        .filter(|bytes| !bytes.is_empty())
        .and_then(|bytes| match image::load_from_memory(bytes) {
            Ok(img) => Some(img),
            Err(e) => {
                debug!("Icon could not be decoded, using flat background: {}", e);
                None
            }
        });

    if let Some(img) = decoded {
        let mut icon = img
            .resize_exact(KEY_IMAGE_SIZE, KEY_IMAGE_SIZE, FilterType::Triangle)
            .blur(ICON_BLUR_SIGMA)
            .to_rgba8();
        for pixel in icon.pixels_mut() {
            for channel in &mut pixel.0[..3] {
                *channel = (*channel as f32 * ICON_BRIGHTNESS) as u8;
            }
        }
        imageops::overlay(&mut canvas, &icon, 0, 0);
    }

    canvas
}

/// Transparent RGBA surface embedded-graphics can draw into.
struct TextLayer(RgbaImage);

impl OriginDimensions for TextLayer {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for TextLayer {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < self.0.width() && y < self.0.height() {
                self.0
                    .put_pixel(x, y, Rgba([color.r(), color.g(), color.b(), 0xff]));
            }
        }
        Ok(())
    }
}

/// Text size in pixels including the one-pixel outline on every side.
fn measure(text: &str, font: &MonoFont<'static>) -> (u32, u32) {
    let style = MonoTextStyle::new(font, Rgb888::WHITE);
    let size = style
        .measure_string(text, Point::zero(), Baseline::Top)
        .bounding_box
        .size;
    (size.width + 2, size.height + 2)
}

/// Picks the font and integer scale giving the tallest text that fits.
fn pick_layout(text: &str) -> (&'static MonoFont<'static>, u32) {
    let available = KEY_IMAGE_SIZE - 2 * TEXT_MARGIN;
    let mut best: Option<(&'static MonoFont<'static>, u32, u32)> = None;

    for font in FONTS {
        let (width, height) = measure(text, font);
        for scale in 1..=MAX_TEXT_SCALE {
            if width * scale > available || height * scale > available {
                break;
            }
            let scaled_height = height * scale;
            if best.map_or(true, |(_, _, h)| scaled_height > h) {
                best = Some((font, scale, scaled_height));
            }
        }
    }

    best.map(|(font, scale, _)| (font, scale))
        .unwrap_or((FONTS[FONTS.len() - 1], 1))
}

fn draw_centered_text(canvas: &mut RgbaImage, text: &str) {
    let (font, scale) = pick_layout(text);
    let (width, height) = measure(text, font);

    let mut layer = TextLayer(RgbaImage::new(width, height));
    let outline_style = MonoTextStyle::new(font, Rgb888::BLACK);
    let text_style = MonoTextStyle::new(font, Rgb888::WHITE);
    let origin = Point::new(1, 1);

    for (dx, dy) in OUTLINE_OFFSETS {
        Text::with_baseline(text, origin + Point::new(dx, dy), outline_style, Baseline::Top)
            .draw(&mut layer)
            .ok();
    }
    Text::with_baseline(text, origin, text_style, Baseline::Top)
        .draw(&mut layer)
        .ok();

    let scaled = imageops::resize(
        &layer.0,
        width * scale,
        height * scale,
        FilterType::Nearest,
    );
    let x = (i64::from(KEY_IMAGE_SIZE) - i64::from(scaled.width())) / 2;
    let y = (i64::from(KEY_IMAGE_SIZE) - i64::from(scaled.height())) / 2;
    imageops::overlay(canvas, &scaled, x, y);
}
