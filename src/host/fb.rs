//! Software path
//!
//! Plain-memory pixmaps and the memory-level screen operations the
//! accelerated strategies fall back to. Only byte-moving operations are
//! implemented here; picture primitives beyond Src/Clear composites are
//! accepted and counted, their rasterization lives outside this crate.

use super::{
    bits_per_pixel, pixmap_pitch, CompositeArgs, Drawable, Gc, GcOps, GlyphId, PictFormat,
    PictOp, Picture, PictureBackend, PictureId, Pixmap, PixmapHeader, PixmapId, PixmapUsage,
    PrimitiveArgs, Rect, Screen, ScreenBackend, Span, SurfaceAllocator, WindowId,
    MAX_PIXMAP_DIMENSION,
};
use crate::pixmap::resolve_backing_surface;
use log::{debug, trace, warn};

/// Allocates pixmaps in host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FbAllocator;

impl SurfaceAllocator for FbAllocator {
    fn create_pixmap(
        &self,
        screen: &mut Screen,
        width: u32,
        height: u32,
        depth: u8,
        usage: PixmapUsage,
    ) -> Option<PixmapId> {
        if width > MAX_PIXMAP_DIMENSION || height > MAX_PIXMAP_DIMENSION {
            return None;
        }

        let bpp = bits_per_pixel(depth);
        let dev_kind = pixmap_pitch(width, bpp);
        let id = PixmapId(screen.alloc_id());
        screen.pixmaps.insert(
            id,
            Pixmap {
                id,
                drawable: super::DrawableInfo {
                    width,
                    height,
                    depth,
                    bits_per_pixel: bpp,
                },
                dev_kind,
                refcnt: 1,
                usage,
                data: vec![0; dev_kind as usize * height as usize],
                accel: None,
            },
        );
        trace!("fb: pixmap {} {}x{} depth {}", id.0, width, height, depth);
        Some(id)
    }

    fn destroy_pixmap(&self, screen: &mut Screen, pixmap: PixmapId) -> bool {
        let Some(entry) = screen.pixmaps.get_mut(&pixmap) else {
            warn!("fb: destroy of unknown pixmap {}", pixmap.0);
            return false;
        };

        entry.refcnt = entry.refcnt.saturating_sub(1);
        if entry.refcnt == 0 {
            screen.pixmaps.remove(&pixmap);
            trace!("fb: freed pixmap {}", pixmap.0);
        }
        true
    }

    fn modify_pixmap_header(
        &self,
        screen: &mut Screen,
        pixmap: PixmapId,
        header: PixmapHeader,
    ) -> bool {
        let Some(entry) = screen.pixmaps.get_mut(&pixmap) else {
            return false;
        };
        entry.drawable.width = header.width;
        entry.drawable.height = header.height;
        entry.dev_kind = header.dev_kind;
        true
    }
}

/// `origin + step`, or `None` once the coordinate leaves `i32`.
fn offset(origin: i32, step: usize) -> Option<i32> {
    i32::try_from(step).ok().and_then(|step| origin.checked_add(step))
}

/// Copies `rect` out of a pixmap's memory, zero-filling anything outside
/// the pixmap or not resident in memory.
fn read_rect(pixmap: &Pixmap, rect: Rect) -> Vec<u8> {
    let bytes_pp = (pixmap.drawable.bits_per_pixel as usize).div_ceil(8);
    let row_len = rect.width as usize * bytes_pp;
    let mut out = vec![0; row_len * rect.height as usize];

    for row in 0..rect.height as usize {
        let Some(y) = offset(rect.y, row) else {
            break;
        };
        if y < 0 || y as u32 >= pixmap.drawable.height {
            continue;
        }
        for col in 0..rect.width as usize {
            let Some(x) = offset(rect.x, col) else {
                break;
            };
            if x < 0 || x as u32 >= pixmap.drawable.width {
                continue;
            }
            let src = y as usize * pixmap.dev_kind as usize + x as usize * bytes_pp;
            let dst = row * row_len + col * bytes_pp;
            if let Some(pixel) = pixmap.data.get(src..src + bytes_pp) {
                out[dst..dst + bytes_pp].copy_from_slice(pixel);
            }
        }
    }
    out
}

fn write_rect(pixmap: &mut Pixmap, rect: Rect, pixels: &[u8], bytes_pp: usize) {
    let row_len = rect.width as usize * bytes_pp;
    for row in 0..rect.height as usize {
        let Some(y) = offset(rect.y, row) else {
            break;
        };
        if y < 0 || y as u32 >= pixmap.drawable.height {
            continue;
        }
        for col in 0..rect.width as usize {
            let Some(x) = offset(rect.x, col) else {
                break;
            };
            if x < 0 || x as u32 >= pixmap.drawable.width {
                continue;
            }
            let dst = y as usize * pixmap.dev_kind as usize + x as usize * bytes_pp;
            let src = row * row_len + col * bytes_pp;
            if let (Some(target), Some(pixel)) = (
                pixmap.data.get_mut(dst..dst + bytes_pp),
                pixels.get(src..src + bytes_pp),
            ) {
                target.copy_from_slice(pixel);
            }
        }
    }
}

/// Screen operations on host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FbScreenBackend;

impl ScreenBackend for FbScreenBackend {
    fn close_screen(&self, screen: &mut Screen) -> bool {
        debug!("fb: closing screen {}", screen.num);
        screen.mark_closed();
        true
    }

    fn create_gc(&self, _screen: &mut Screen, depth: u8) -> Gc {
        Gc {
            depth,
            ops: GcOps::Software,
        }
    }

    fn create_pixmap(
        &self,
        screen: &mut Screen,
        width: u32,
        height: u32,
        depth: u8,
        usage: PixmapUsage,
    ) -> Option<PixmapId> {
        let fb = std::rc::Rc::clone(&screen.fb);
        fb.create_pixmap(screen, width, height, depth, usage)
    }

    fn destroy_pixmap(&self, screen: &mut Screen, pixmap: PixmapId) -> bool {
        let fb = std::rc::Rc::clone(&screen.fb);
        fb.destroy_pixmap(screen, pixmap)
    }

    fn get_spans(&self, screen: &mut Screen, drawable: Drawable, spans: &[Span]) -> Vec<u8> {
        screen.software_ops.get_spans += 1;
        let Some(pixmap) =
            resolve_backing_surface(screen, drawable).and_then(|id| screen.pixmap(id))
        else {
            return Vec::new();
        };
        spans
            .iter()
            .flat_map(|span| read_rect(pixmap, Rect::new(span.x, span.y, span.width, 1)))
            .collect()
    }

    fn get_image(&self, screen: &mut Screen, drawable: Drawable, rect: Rect) -> Vec<u8> {
        screen.software_ops.get_image += 1;
        match resolve_backing_surface(screen, drawable).and_then(|id| screen.pixmap(id)) {
            Some(pixmap) => read_rect(pixmap, rect),
            None => Vec::new(),
        }
    }

    fn change_window_attributes(&self, screen: &mut Screen, window: WindowId, _mask: u32) -> bool {
        screen.window(window).is_some()
    }

    fn copy_window(
        &self,
        screen: &mut Screen,
        window: WindowId,
        old_origin: (i32, i32),
        region: &[Rect],
    ) {
        screen.software_ops.copy_window += 1;
        // Every window owns its backing pixmap, so contents travel with the
        // window and there is nothing to move in memory.
        trace!(
            "fb: copy_window {} from {:?} ({} rects)",
            window.0,
            old_origin,
            region.len()
        );
    }

    fn bitmap_to_region(&self, screen: &mut Screen, pixmap: PixmapId) -> Vec<Rect> {
        let Some(bitmap) = screen.pixmap(pixmap) else {
            return Vec::new();
        };
        if bitmap.drawable.depth != 1 {
            warn!("fb: bitmap_to_region on depth {} pixmap", bitmap.drawable.depth);
            return Vec::new();
        }

        let mut region = Vec::new();
        for y in 0..bitmap.drawable.height {
            let row = y as usize * bitmap.dev_kind as usize;
            let mut run_start: Option<u32> = None;
            for x in 0..=bitmap.drawable.width {
                let set = x < bitmap.drawable.width
                    && bitmap
                        .data
                        .get(row + (x / 8) as usize)
                        .is_some_and(|byte| byte & (1 << (x % 8)) != 0);
                match (set, run_start) {
                    (true, None) => run_start = Some(x),
                    (false, Some(start)) => {
                        region.push(Rect::new(start as i32, y as i32, x - start, 1));
                        run_start = None;
                    }
                    _ => {}
                }
            }
        }
        region
    }
}

/// Render extension on host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FbPictureBackend;

impl PictureBackend for FbPictureBackend {
    fn create_picture(
        &self,
        screen: &mut Screen,
        drawable: Drawable,
        format: PictFormat,
    ) -> Option<PictureId> {
        resolve_backing_surface(screen, drawable)?;
        let id = PictureId(screen.alloc_id());
        screen.pictures.insert(
            id,
            Picture {
                id,
                drawable,
                format,
            },
        );
        Some(id)
    }

    fn destroy_picture(&self, screen: &mut Screen, picture: PictureId) {
        screen.pictures.remove(&picture);
    }

    fn composite(&self, screen: &mut Screen, args: &CompositeArgs) {
        screen.software_ops.composite += 1;
        let target = |screen: &Screen, picture: PictureId| {
            screen
                .picture(picture)
                .and_then(|p| resolve_backing_surface(screen, p.drawable))
        };
        let Some(dst) = target(&*screen, args.dst) else {
            return;
        };
        let area = |origin: (i32, i32)| Rect::new(origin.0, origin.1, args.width, args.height);

        match args.op {
            PictOp::Clear => {
                if let Some(pixmap) = screen.pixmap_mut(dst) {
                    let bytes_pp = (pixmap.drawable.bits_per_pixel as usize).div_ceil(8);
                    let zeros = vec![0; args.width as usize * args.height as usize * bytes_pp];
                    write_rect(pixmap, area(args.dst_origin), &zeros, bytes_pp);
                }
            }
            PictOp::Src if args.mask.is_none() => {
                let Some(src) = target(&*screen, args.src) else {
                    return;
                };
                let Some(pixels) = screen.pixmap(src).map(|p| read_rect(p, area(args.src_origin)))
                else {
                    return;
                };
                let src_bpp = screen.pixmap(src).map(|p| p.drawable.bits_per_pixel);
                if let Some(pixmap) = screen.pixmap_mut(dst) {
                    if src_bpp == Some(pixmap.drawable.bits_per_pixel) {
                        let bytes_pp = (pixmap.drawable.bits_per_pixel as usize).div_ceil(8);
                        write_rect(pixmap, area(args.dst_origin), &pixels, bytes_pp);
                    }
                }
            }
            op => trace!("fb: composite {:?} left to the rasterizer", op),
        }
    }

    fn trapezoids(&self, screen: &mut Screen, args: &PrimitiveArgs) {
        screen.software_ops.trapezoids += 1;
        trace!("fb: {} trapezoids", args.shapes.len());
    }

    fn triangles(&self, screen: &mut Screen, args: &PrimitiveArgs) {
        screen.software_ops.triangles += 1;
        trace!("fb: {} triangles", args.shapes.len());
    }

    fn glyphs(&self, screen: &mut Screen, args: &PrimitiveArgs) {
        screen.software_ops.glyphs += 1;
        trace!("fb: {} glyphs", args.shapes.len());
    }

    fn add_traps(
        &self,
        screen: &mut Screen,
        picture: PictureId,
        _offset: (i32, i32),
        traps: &[Rect],
    ) {
        screen.software_ops.add_traps += 1;
        trace!("fb: {} traps into picture {}", traps.len(), picture.0);
    }

    fn unrealize_glyph(&self, _screen: &mut Screen, glyph: GlyphId) {
        trace!("fb: unrealize glyph {}", glyph.0);
    }
}
