//! Offscreen drawing surface used to re-encode images as PNG.

use crate::encoding::to_data_uri;
use crate::error::{Error, Result};
use tiny_skia::{ColorU8, Pixmap, PixmapPaint, Transform};

pub struct Canvas {
    pixmap: Pixmap,
}

impl Canvas {
    /// A transparent surface. Fails for a zero or oversized area.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width, height).ok_or(Error::SurfaceAlloc { width, height })?;
        Ok(Canvas { pixmap })
    }

    /// Draws a straight-alpha RGBA image at the origin, at its natural size.
    pub fn draw_image(&mut self, image: &image::RgbaImage) -> Result<()> {
        let (width, height) = image.dimensions();
        let mut source = Pixmap::new(width, height).ok_or(Error::SurfaceAlloc { width, height })?;
        for (dst, px) in source.pixels_mut().iter_mut().zip(image.pixels()) {
            *dst = ColorU8::from_rgba(px[0], px[1], px[2], px[3]).premultiply();
        }
        self.pixmap.draw_pixmap(
            0,
            0,
            source.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        Ok(())
    }

    /// Renders an SVG document at the origin, at its intrinsic size.
    pub fn draw_svg(&mut self, tree: &usvg::Tree) {
        resvg::render(tree, Transform::identity(), &mut self.pixmap.as_mut());
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        self.pixmap.encode_png().map_err(|_| Error::PngEncode)
    }

    /// `data:image/png;base64,...`
    pub fn to_data_url(&self) -> Result<String> {
        Ok(to_data_uri("image/png", &self.to_png()?))
    }
}
