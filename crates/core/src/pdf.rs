//! Slide deck PDF assembly: one full-bleed JPEG image per page.

use crate::config::Viewport;
use crate::error::{ExportError, Result};
use crate::rasterizer::apply_background;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref};

/// PDF points per CSS pixel.
pub const POINTS_PER_PX: f32 = 0.75;

const IMAGE_NAME: &[u8] = b"Im1";

/// One captured page, flattened and JPEG-encoded.
#[derive(Debug, Clone)]
pub struct PdfPage {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

impl PdfPage {
    /// Flatten a PNG capture onto white and encode it at `quality`.
    pub fn from_png(png: &[u8], quality: u8) -> Result<Self> {
        let rgba = image::load_from_memory(png)?.into_rgba8();
        let rgb = DynamicImage::ImageRgba8(apply_background(rgba, (255, 255, 255))).into_rgb8();

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .encode_image(&rgb)
            .map_err(|e| ExportError::PdfError(e.to_string()))?;
        Ok(Self {
            jpeg,
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Write a PDF with one page of `page_size` CSS pixels per image, each image
/// stretched over its whole page.
pub fn write_image_pdf(pages: &[PdfPage], page_size: Viewport) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(ExportError::NoSlides);
    }
    let width = page_size.width as f32 * POINTS_PER_PX;
    let height = page_size.height as f32 * POINTS_PER_PX;

    let mut next_id = 1;
    let mut alloc = || {
        let r = Ref::new(next_id);
        next_id += 1;
        r
    };
    let catalog_id = alloc();
    let pages_id = alloc();
    let page_ids: Vec<Ref> = pages.iter().map(|_| alloc()).collect();

    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id)
        .kids(page_ids.iter().copied())
        .count(pages.len() as i32);

    for (page, &page_id) in pages.iter().zip(&page_ids) {
        let image_id = alloc();
        let content_id = alloc();

        let mut image = pdf.image_xobject(image_id, &page.jpeg);
        image.filter(Filter::DctDecode);
        image.width(page.width as i32);
        image.height(page.height as i32);
        image.color_space().device_rgb();
        image.bits_per_component(8);
        image.finish();

        let mut content = Content::new();
        content.save_state();
        content.transform([width, 0.0, 0.0, height, 0.0, 0.0]);
        content.x_object(Name(IMAGE_NAME));
        content.restore_state();
        pdf.stream(content_id, &content.finish());

        let mut writer = pdf.page(page_id);
        writer
            .media_box(Rect::new(0.0, 0.0, width, height))
            .parent(pages_id)
            .contents(content_id);
        writer.resources().x_objects().pair(Name(IMAGE_NAME), image_id);
        writer.finish();
    }

    Ok(pdf.finish())
}
