//! GDI frame grabber for displays and windows.
//!
//! A dedicated thread copies the target's pixels with `BitBlt` into a
//! top-down 32bpp DIB at the configured frame rate and hands each frame to
//! the sink as raw BGRA. Encoding is left to whoever consumes the artifact,
//! so `display.mp4`/`window.mp4` end up holding unframed BGRA frames, not an
//! MP4 container.
//!
//! A captured window that closes ends the stream on its own
//! (`ChunkSink::end_of_stream`); the session keeps what was written.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC,
    SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, CAPTUREBLT, DIB_RGB_COLORS, SRCCOPY,
};
use windows::Win32::UI::WindowsAndMessaging::{GetClientRect, IsWindow};

use screen_capture_core::models::error::CaptureError;
use screen_capture_core::models::target::{CaptureTarget, TargetKind};
use screen_capture_core::stream::sink::{ChunkSink, MediaChunk};
use screen_capture_core::traits::capture_source::CaptureSource;

use crate::targets;

/// What the grabber reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    /// A monitor, by `HMONITOR` id.
    Display(u32),
    /// A top-level window, by `HWND` id.
    Window(u32),
}

/// Periodic GDI screen/window capture.
pub struct GdiFrameCapture {
    surface: Surface,
    frame_interval: Duration,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl GdiFrameCapture {
    pub fn new(target: &CaptureTarget, frame_rate: u32) -> Self {
        let surface = match target.kind {
            TargetKind::Display => Surface::Display(target.id),
            TargetKind::Window => Surface::Window(target.id),
        };
        Self {
            surface,
            frame_interval: frame_interval(frame_rate),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }
}

impl CaptureSource for GdiFrameCapture {
    fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::CaptureStartFailed("frame capture already running".into()));
        }

        // Fail fast on a target that vanished between listing and start.
        source_rect(self.surface)?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let surface = self.surface;
        let interval = self.frame_interval;

        let handle = thread::Builder::new()
            .name("gdi-frame-capture".into())
            .spawn(move || frame_loop(surface, interval, &running, &paused, &sink))
            .map_err(|e| CaptureError::CaptureStartFailed(format!("failed to spawn frame thread: {}", e)))?;

        self.capture_handle = Some(handle);
        log::debug!("GDI capture of {:?} every {:?}", self.surface, self.frame_interval);
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), CaptureError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.take() {
            handle
                .join()
                .map_err(|_| CaptureError::Unknown("frame capture thread panicked".into()))?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.capture_handle.take();
    }
}

fn frame_interval(frame_rate: u32) -> Duration {
    Duration::from_secs(1) / frame_rate.max(1)
}

fn frame_loop(surface: Surface, interval: Duration, running: &AtomicBool, paused: &AtomicBool, sink: &ChunkSink) {
    let started = Instant::now();
    let mut next_frame = started;

    while running.load(Ordering::SeqCst) {
        if !paused.load(Ordering::SeqCst) && sink.is_accepting() {
            match grab_frame(surface) {
                Ok(frame) => sink.push(MediaChunk::new(started.elapsed(), frame)),
                Err(e) => {
                    if let Surface::Window(id) = surface {
                        if unsafe { !IsWindow(Some(targets::window_handle(id))).as_bool() } {
                            log::info!("Captured window {} closed", id);
                            sink.end_of_stream();
                            break;
                        }
                    }
                    sink.report_error(e);
                }
            }
        }

        next_frame += interval;
        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        } else {
            // Running behind: skip the missed frames instead of bursting.
            next_frame = now;
        }
    }
}

/// Source rectangle: virtual-screen coordinates for a display, client
/// coordinates for a window.
fn source_rect(surface: Surface) -> Result<RECT, CaptureError> {
    match surface {
        Surface::Display(id) => targets::monitor_rect(targets::monitor_handle(id))
            .ok_or_else(|| CaptureError::CaptureStartFailed(format!("display {} is gone", id))),
        Surface::Window(id) => {
            let mut rect = RECT::default();
            unsafe { GetClientRect(targets::window_handle(id), &mut rect) }
                .map_err(|e| CaptureError::CaptureStartFailed(format!("window {} is gone: {}", id, e)))?;
            Ok(rect)
        }
    }
}

/// Copy one frame as top-down BGRA.
fn grab_frame(surface: Surface) -> Result<Vec<u8>, CaptureError> {
    let rect = source_rect(surface)?;
    let width = rect.right - rect.left;
    let height = rect.bottom - rect.top;
    if width <= 0 || height <= 0 {
        return Err(CaptureError::Unknown(format!("{:?} has an empty area", surface)));
    }

    let window: Option<HWND> = match surface {
        Surface::Display(_) => None,
        Surface::Window(id) => Some(targets::window_handle(id)),
    };

    unsafe {
        let source_dc = GetDC(window);
        if source_dc.is_invalid() {
            return Err(CaptureError::Unknown("GetDC failed".into()));
        }
        let memory_dc = CreateCompatibleDC(Some(source_dc));
        let bitmap = CreateCompatibleBitmap(source_dc, width, height);
        let previous = SelectObject(memory_dc, bitmap.into());

        let copied = BitBlt(
            memory_dc,
            0,
            0,
            width,
            height,
            Some(source_dc),
            rect.left,
            rect.top,
            SRCCOPY | CAPTUREBLT,
        );

        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                // Negative height asks for a top-down DIB.
                biHeight: -height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        let lines = if copied.is_ok() {
            GetDIBits(
                memory_dc,
                bitmap,
                0,
                height as u32,
                Some(pixels.as_mut_ptr() as *mut c_void),
                &mut info,
                DIB_RGB_COLORS,
            )
        } else {
            0
        };

        SelectObject(memory_dc, previous);
        let _ = DeleteObject(bitmap.into());
        let _ = DeleteDC(memory_dc);
        ReleaseDC(window, source_dc);

        copied.map_err(|e| CaptureError::Unknown(format!("BitBlt failed: {}", e)))?;
        if lines != height {
            return Err(CaptureError::Unknown(format!("GetDIBits copied {} of {} lines", lines, height)));
        }
        Ok(pixels)
    }
}
