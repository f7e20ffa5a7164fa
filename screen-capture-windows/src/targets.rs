//! Display and window enumeration via GDI and the window manager.
//!
//! Displays come from `EnumDisplayMonitors`; their ids are the `HMONITOR`
//! handle values, which stay stable while the monitor is attached. Windows
//! come from `EnumWindows`, filtered to visible top-level windows with a
//! title; their ids are the `HWND` values.

use std::ffi::c_void;

use windows::core::{BOOL, PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, EnumDisplaySettingsW, GetMonitorInfoW, DEVMODEW, ENUM_CURRENT_SETTINGS, HDC,
    HMONITOR, MONITORINFO, MONITORINFOEXW,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
};

use screen_capture_core::models::target::CaptureTarget;
use screen_capture_core::traits::capability_provider::CapabilityProvider;

use crate::permissions;

/// Lists capturable targets on the interactive desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Targets;

impl Win32Targets {
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityProvider for Win32Targets {
    fn has_permission(&self) -> bool {
        permissions::has_screen_capture_permission()
    }

    fn list_displays(&self) -> Vec<CaptureTarget> {
        let mut monitors: Vec<HMONITOR> = Vec::new();
        unsafe {
            let ok = EnumDisplayMonitors(
                None,
                None,
                Some(collect_monitor),
                LPARAM(&mut monitors as *mut Vec<HMONITOR> as isize),
            );
            if !ok.as_bool() {
                log::warn!("EnumDisplayMonitors failed");
            }
        }
        monitors.into_iter().filter_map(describe_monitor).collect()
    }

    fn list_windows(&self) -> Vec<CaptureTarget> {
        let mut handles: Vec<HWND> = Vec::new();
        unsafe {
            if let Err(e) = EnumWindows(Some(collect_window), LPARAM(&mut handles as *mut Vec<HWND> as isize)) {
                log::warn!("EnumWindows failed: {}", e);
            }
        }
        handles.into_iter().filter_map(describe_window).collect()
    }
}

// User handles carry 32 significant bits and are sign-extended on 64-bit
// Windows, so ids go through i32 in both directions.

/// Numeric id for a window handle.
pub(crate) fn window_id(hwnd: HWND) -> u32 {
    hwnd.0 as isize as i32 as u32
}

/// Window handle for a numeric id.
pub(crate) fn window_handle(id: u32) -> HWND {
    HWND(id as i32 as isize as *mut c_void)
}

pub(crate) fn monitor_id(monitor: HMONITOR) -> u32 {
    monitor.0 as isize as i32 as u32
}

pub(crate) fn monitor_handle(id: u32) -> HMONITOR {
    HMONITOR(id as i32 as isize as *mut c_void)
}

/// Virtual-screen rectangle of a monitor.
pub(crate) fn monitor_rect(monitor: HMONITOR) -> Option<RECT> {
    let mut info = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    unsafe { GetMonitorInfoW(monitor, &mut info).as_bool().then_some(info.rcMonitor) }
}

unsafe extern "system" fn collect_monitor(monitor: HMONITOR, _hdc: HDC, _rect: *mut RECT, data: LPARAM) -> BOOL {
    let monitors = &mut *(data.0 as *mut Vec<HMONITOR>);
    monitors.push(monitor);
    BOOL(1)
}

unsafe extern "system" fn collect_window(hwnd: HWND, data: LPARAM) -> BOOL {
    if IsWindowVisible(hwnd).as_bool() && GetWindowTextLengthW(hwnd) > 0 {
        let handles = &mut *(data.0 as *mut Vec<HWND>);
        handles.push(hwnd);
    }
    BOOL(1)
}

fn describe_monitor(monitor: HMONITOR) -> Option<CaptureTarget> {
    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;

    unsafe {
        if !GetMonitorInfoW(monitor, &mut info.monitorInfo).as_bool() {
            return None;
        }

        let device_name = utf16_until_nul(&info.szDevice);
        let mut mode = DEVMODEW {
            dmSize: std::mem::size_of::<DEVMODEW>() as u16,
            ..Default::default()
        };
        let refresh_rate = if EnumDisplaySettingsW(PCWSTR(info.szDevice.as_ptr()), ENUM_CURRENT_SETTINGS, &mut mode)
            .as_bool()
        {
            mode.dmDisplayFrequency
        } else {
            0
        };

        let rect = info.monitorInfo.rcMonitor;
        log::trace!(
            "Monitor {} {}x{} @ {}Hz",
            device_name,
            rect.right - rect.left,
            rect.bottom - rect.top,
            refresh_rate
        );

        Some(CaptureTarget::display(monitor_id(monitor), device_name, refresh_rate))
    }
}

fn describe_window(hwnd: HWND) -> Option<CaptureTarget> {
    unsafe {
        let mut title = [0u16; 512];
        let len = GetWindowTextW(hwnd, &mut title);
        if len <= 0 {
            return None;
        }
        let title = String::from_utf16_lossy(&title[..len as usize]);

        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        let owner = process_name(pid).unwrap_or_default();

        Some(CaptureTarget::window(window_id(hwnd), title, owner))
    }
}

/// Executable name (without directory) of a process, if it can be queried.
fn process_name(pid: u32) -> Option<String> {
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let mut buffer = [0u16; 1024];
        let mut size = buffer.len() as u32;
        let queried = QueryFullProcessImageNameW(process, PROCESS_NAME_WIN32, PWSTR(buffer.as_mut_ptr()), &mut size);
        let _ = CloseHandle(process);
        queried.ok()?;

        let path = String::from_utf16_lossy(&buffer[..size as usize]);
        Some(executable_stem(&path).to_string())
    }
}

fn utf16_until_nul(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

fn executable_stem(path: &str) -> &str {
    let file = path.rsplit(['\\', '/']).next().unwrap_or(path);
    file.strip_suffix(".exe").unwrap_or(file)
}
