//! Track boxes and labels drawn onto processed frames before they are streamed.

use ab_glyph::{FontVec, PxScale};
use attend_core::{BoundingBox, Track};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

pub const RECOGNIZED: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNRESOLVED: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 3;
const LABEL_HEIGHT: u32 = 30;
const LABEL_SCALE: f32 = 16.0;

/// Draws every live track: a coloured box, plus a label band when a font is loaded.
pub struct Overlay {
    font: Option<FontVec>,
    min_embeddings: usize,
}

impl Overlay {
    pub fn new(font: Option<FontVec>, min_embeddings: usize) -> Self {
        Self {
            font,
            min_embeddings,
        }
    }

    /// Load the label font from `path`. An unreadable font leaves boxes without labels.
    pub fn with_font_file(path: &Path, min_embeddings: usize) -> Self {
        let font = match std::fs::read(path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "invalid label font, drawing boxes only"
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "label font not found, drawing boxes only"
                );
                None
            }
        };
        Self::new(font, min_embeddings)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Green box around every recognized track, red around the rest.
    pub fn annotate(&self, frame: &mut RgbImage, tracks: &[Track]) {
        for track in tracks {
            let color = if track.identity().is_some() {
                RECOGNIZED
            } else {
                UNRESOLVED
            };
            draw_box(frame, &track.last_bbox, color);
            if let Some(font) = &self.font {
                let text = self.label(track);
                draw_label(frame, &track.last_bbox, color, font, &text);
            }
        }
    }

    /// `ID: 7 (93%)` for recognized tracks, `Track 4 (1/2)` while collecting samples.
    pub fn label(&self, track: &Track) -> String {
        match track.identity() {
            Some(employee) => format!("ID: {employee} ({:.0}%)", track.confidence() * 100.0),
            None => format!(
                "Track {} ({}/{})",
                track.id,
                track.sample_count(),
                self.min_embeddings
            ),
        }
    }
}

/// Outline `bbox` with a band `BOX_THICKNESS` pixels wide, growing inward.
pub fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let Some((x, y, w, h)) = bbox.clip_to(frame.width(), frame.height()) else {
        return;
    };
    for inset in 0..BOX_THICKNESS {
        let (Some(iw), Some(ih)) = (w.checked_sub(2 * inset), h.checked_sub(2 * inset)) else {
            break;
        };
        if iw == 0 || ih == 0 {
            break;
        }
        let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(iw, ih);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

/// Filled band along the bottom edge of the box with white text in it.
fn draw_label(
    frame: &mut RgbImage,
    bbox: &BoundingBox,
    color: Rgb<u8>,
    font: &FontVec,
    text: &str,
) {
    let Some((x, y, w, h)) = bbox.clip_to(frame.width(), frame.height()) else {
        return;
    };
    let band = LABEL_HEIGHT.min(h);
    if w == 0 || band == 0 {
        return;
    }
    let top = y + h - band;
    draw_filled_rect_mut(frame, Rect::at(x as i32, top as i32).of_size(w, band), color);
    let text_top = top as i32 + (band as i32 - LABEL_SCALE as i32) / 2;
    draw_text_mut(
        frame,
        LABEL_TEXT,
        x as i32 + 6,
        text_top,
        PxScale::from(LABEL_SCALE),
        font,
        text,
    );
}
