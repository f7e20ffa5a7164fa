//! WASAPI loopback capture source for system audio.
//!
//! Captures the audio mix going to the default render endpoint using
//! `AUDCLNT_STREAMFLAGS_LOOPBACK`. No special permissions needed on Windows.
//!
//! Chunks carry interleaved little-endian `f32` PCM in the endpoint's mix
//! format; the session stores them as-is, so `system_audio.ogg` is raw PCM
//! and not an Ogg stream.
//!
//! ## Notes
//! - DRM-protected audio is silenced in loopback
//! - Silent packets are emitted as zeroed buffers so the artifact keeps time

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use screen_capture_core::models::error::CaptureError;
use screen_capture_core::stream::sink::{ChunkSink, MediaChunk};
use screen_capture_core::traits::capture_source::CaptureSource;

/// How long `start` waits for the endpoint to initialize.
const INIT_TIMEOUT: Duration = Duration::from_secs(3);

/// WASAPI loopback capture for system audio.
///
/// All COM objects live on the capture thread. `stop` joins it; `abort`
/// only signals it.
pub struct WasapiLoopbackCapture {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiLoopbackCapture {
    /// Create a loopback capture on the default render device.
    pub fn default_device() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }
}

impl CaptureSource for WasapiLoopbackCapture {
    fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::CaptureStartFailed("loopback capture already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("wasapi-loopback-capture".into())
            .spawn(move || {
                if let Err(e) = loopback_capture_loop(&running, &paused, &sink, ready_tx) {
                    log::error!("Loopback capture error: {}", e);
                    // Only a failure after initialization ends the stream on its own.
                    if running.load(Ordering::SeqCst) {
                        sink.report_error(e);
                        sink.end_of_stream();
                    }
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CaptureError::CaptureStartFailed(format!("failed to spawn loopback thread: {}", e)))?;

        match ready_rx.recv_timeout(INIT_TIMEOUT) {
            Ok(Ok(())) => {
                self.capture_handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                log::warn!("Loopback endpoint did not initialize within {:?}", INIT_TIMEOUT);
                Err(CaptureError::Timeout)
            }
        }
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
                .map_err(|_| CaptureError::Unknown("loopback capture thread panicked".into()))?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.capture_handle.take();
    }
}

/// Main loopback capture loop running on a dedicated thread.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Get default render endpoint
/// 3. Activate IAudioClient
/// 4. Initialize with LOOPBACK flag in shared mode
/// 5. Get IAudioCaptureClient
/// 6. Register with MMCSS
/// 7. Start, report ready, poll for buffers
fn loopback_capture_loop(
    running: &AtomicBool,
    paused: &AtomicBool,
    sink: &ChunkSink,
    ready: mpsc::Sender<Result<(), CaptureError>>,
) -> Result<(), CaptureError> {
    if let Err(e) = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }.ok() {
        let e = CaptureError::CaptureStartFailed(format!("CoInitializeEx failed: {}", e));
        let _ = ready.send(Err(e.clone()));
        return Err(e);
    }
    // Declared before the COM objects so it drops after them.
    let _com_guard = CoUninitializeGuard;

    let (audio_client, capture_client, block_align) = match unsafe { open_loopback() } {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e.clone()));
            return Err(e);
        }
    };
    let _ = ready.send(Ok(()));

    let started = Instant::now();

    unsafe {
        while running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));

            let mut packet_length = capture_client
                .GetNextPacketSize()
                .map_err(|e| CaptureError::Unknown(format!("GetNextPacketSize failed: {}", e)))?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                capture_client
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .map_err(|e| CaptureError::Unknown(format!("GetBuffer failed: {}", e)))?;

                if num_frames > 0 && !buffer_ptr.is_null() && !paused.load(Ordering::SeqCst) {
                    let byte_len = num_frames as usize * block_align;
                    let data = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        vec![0u8; byte_len]
                    } else {
                        std::slice::from_raw_parts(buffer_ptr, byte_len).to_vec()
                    };
                    sink.push(MediaChunk::new(started.elapsed(), data));
                }

                capture_client
                    .ReleaseBuffer(num_frames)
                    .map_err(|e| CaptureError::Unknown(format!("ReleaseBuffer failed: {}", e)))?;

                packet_length = capture_client
                    .GetNextPacketSize()
                    .map_err(|e| CaptureError::Unknown(format!("GetNextPacketSize failed: {}", e)))?;
            }
        }

        let _ = audio_client.Stop();
    }

    Ok(())
}

/// Steps 2–7 of the capture sequence. Returns the running client, its
/// capture service and the frame size in bytes.
unsafe fn open_loopback() -> Result<(IAudioClient, IAudioCaptureClient, usize), CaptureError> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(|e| CaptureError::CaptureStartFailed(format!("failed to create enumerator: {}", e)))?;

    // Loopback reads from the RENDER endpoint
    let device = enumerator
        .GetDefaultAudioEndpoint(eRender, eConsole)
        .map_err(|_| CaptureError::CaptureStartFailed("no default render endpoint".into()))?;

    let audio_client: IAudioClient = device
        .Activate(CLSCTX_ALL, None)
        .map_err(|e| CaptureError::CaptureStartFailed(format!("Activate failed: {}", e)))?;

    let mix_format_ptr = audio_client
        .GetMixFormat()
        .map_err(|e| CaptureError::CaptureStartFailed(format!("GetMixFormat failed: {}", e)))?;
    let block_align = (*mix_format_ptr).nBlockAlign as usize;

    log::debug!(
        "Loopback mix format: {} Hz, {} channels",
        (*mix_format_ptr).nSamplesPerSec,
        (*mix_format_ptr).nChannels
    );

    // 100ms in 100ns units
    let buffer_duration = 1_000_000;

    let initialized = audio_client.Initialize(
        AUDCLNT_SHAREMODE_SHARED,
        AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
        buffer_duration,
        0,
        mix_format_ptr,
        None,
    );
    CoTaskMemFree(Some(mix_format_ptr as *const _));
    initialized.map_err(|e| CaptureError::CaptureStartFailed(format!("IAudioClient::Initialize (loopback) failed: {}", e)))?;

    let capture_client: IAudioCaptureClient = audio_client
        .GetService()
        .map_err(|e| CaptureError::CaptureStartFailed(format!("GetService failed: {}", e)))?;

    // MMCSS registration for real-time priority
    let mut task_index: u32 = 0;
    let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
    let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

    audio_client
        .Start()
        .map_err(|e| CaptureError::CaptureStartFailed(format!("IAudioClient::Start failed: {}", e)))?;

    Ok((audio_client, capture_client, block_align))
}

struct CoUninitializeGuard;

impl Drop for CoUninitializeGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
