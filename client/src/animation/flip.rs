//! Two-sided card flip.
//!
//! The flip sheet is generic mask art: each frame's alpha channel says where
//! the card is at that point of the turn. The actual back and face skins are
//! supplied at runtime and painted through the mask, so one sheet serves
//! every card and every cosmetic loadout.

use image::{imageops, Rgba, RgbaImage};

/// Which skin a flip frame shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Back,
    Face,
}

/// Back skin before the half-point, face skin from it on.
pub fn side_for(frame_index: usize, half_point: usize) -> Side {
    if frame_index < half_point {
        Side::Back
    } else {
        Side::Face
    }
}

/// Paint `skin` through the alpha of `mask`. The skin is scaled to the mask
/// frame first.
pub fn composite(mask: &RgbaImage, skin: &RgbaImage) -> RgbaImage {
    let (w, h) = mask.dimensions();
    let scaled;
    let skin = if skin.dimensions() == (w, h) {
        skin
    } else {
        scaled = imageops::resize(skin, w, h, imageops::FilterType::Triangle);
        &scaled
    };

    RgbaImage::from_fn(w, h, |x, y| {
        let m = mask.get_pixel(x, y)[3] as u16;
        let Rgba([r, g, b, a]) = *skin.get_pixel(x, y);
        Rgba([r, g, b, ((a as u16 * m) / 255) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_point_switches_sides() {
        assert_eq!(side_for(0, 3), Side::Back);
        assert_eq!(side_for(2, 3), Side::Back);
        assert_eq!(side_for(3, 3), Side::Face);
        assert_eq!(side_for(5, 3), Side::Face);
    }

    #[test]
    fn mask_alpha_cuts_the_skin() {
        let mut mask = RgbaImage::new(2, 1);
        mask.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        mask.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        let skin = RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 255]));

        let out = composite(&mask, &skin);
        assert_eq!(out.dimensions(), (2, 1));
        assert_eq!(out.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
        assert_eq!(out.get_pixel(1, 0)[3], 0);
    }
}
