//! CLAP processing unit
//!
//! Loads a .clap bundle, creates the first plugin it exposes, and drives it
//! as a [`ProcessingUnit`]: stereo in, stereo out, no events.

use super::clap_sys::*;
use crate::audio::buffer::UnitBuffer;
use crate::audio::unit::{ChannelLayout, ProcessStatus, ProcessingUnit};
use crate::error::{UnitError, UnitResult};
use libloading::{Library, Symbol};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::ptr;

const HOST_NAME: &[u8] = b"MoodBoard\0";
const HOST_VENDOR: &[u8] = b"MoodBoard\0";
const HOST_URL: &[u8] = b"\0";
const HOST_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// A loaded CLAP plugin instance
pub struct ClapUnit {
    /// Plugin instance
    plugin: *const ClapPlugin,
    /// Plugin entry point
    entry: *const ClapPluginEntry,
    /// Host structure (must outlive the plugin)
    _host: Box<ClapHost>,
    /// Must be dropped last
    _library: Library,

    name: String,
    plugin_id: String,
    bundle_path: PathBuf,

    max_frames: usize,
    is_active: bool,
    is_processing: bool,

    // Pre-allocated at prepare time
    input_data: Vec<Vec<f32>>,
    output_data: Vec<Vec<f32>>,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,
}

// Safety: the raw pointers are owned by this instance and only touched by
// whichever thread currently holds it. The lifecycle hands the unit to the
// audio thread and takes it back without overlap.
unsafe impl Send for ClapUnit {}

fn c_string_or(ptr: *const c_char, fallback: &str) -> String {
    if ptr.is_null() {
        fallback.to_string()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

impl ClapUnit {
    /// Load the first plugin in a .clap bundle and initialize it
    pub fn load(bundle_path: &Path) -> UnitResult<Self> {
        let display_name = bundle_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        let fail = |reason: String| UnitError::InstantiationFailed {
            name: display_name.clone(),
            reason,
        };

        log::info!("Loading CLAP plugin from: {:?}", bundle_path);

        let binary_path = resolve_binary_path(bundle_path).map_err(&fail)?;
        let library = unsafe { Library::new(&binary_path) }
            .map_err(|e| fail(format!("Failed to load library: {}", e)))?;

        let entry: *const ClapPluginEntry = unsafe {
            let symbol: Symbol<*const ClapPluginEntry> = library
                .get(CLAP_ENTRY_SYMBOL)
                .map_err(|e| fail(format!("No clap_entry symbol found: {}", e)))?;
            *symbol
        };
        if entry.is_null() {
            return Err(fail("clap_entry is null".to_string()));
        }

        let entry_ref = unsafe { &*entry };
        if !entry_ref.clap_version.is_compatible() {
            return Err(fail(format!(
                "Unsupported CLAP version {}.{}.{}",
                entry_ref.clap_version.major,
                entry_ref.clap_version.minor,
                entry_ref.clap_version.revision
            )));
        }

        let path_cstr = CString::new(bundle_path.to_string_lossy().as_bytes())
            .map_err(|e| fail(format!("Invalid plugin path: {}", e)))?;
        let init_fn = entry_ref
            .init
            .ok_or_else(|| fail("Plugin has no init function".to_string()))?;
        if !unsafe { init_fn(path_cstr.as_ptr()) } {
            return Err(fail("Plugin entry init() returned false".to_string()));
        }

        // From here on the entry must be deinitialized on failure
        let deinit = |reason: String| {
            if let Some(deinit_fn) = entry_ref.deinit {
                unsafe { deinit_fn() };
            }
            fail(reason)
        };

        let factory = match entry_ref.get_factory {
            Some(get_factory) => unsafe {
                get_factory(CLAP_PLUGIN_FACTORY_ID.as_ptr() as *const c_char) as *const ClapPluginFactory
            },
            None => ptr::null(),
        };
        if factory.is_null() {
            return Err(deinit("Failed to get plugin factory".to_string()));
        }
        let factory_ref = unsafe { &*factory };

        let plugin_count = match factory_ref.get_plugin_count {
            Some(count) => unsafe { count(factory) },
            None => 0,
        };
        if plugin_count == 0 {
            return Err(deinit("No plugins in this bundle".to_string()));
        }

        let descriptor = match factory_ref.get_plugin_descriptor {
            Some(get) => unsafe { get(factory, 0) },
            None => ptr::null(),
        };
        if descriptor.is_null() {
            return Err(deinit("Failed to get plugin descriptor".to_string()));
        }
        let desc_ref = unsafe { &*descriptor };

        let plugin_id = c_string_or(desc_ref.id, "unknown");
        let name = c_string_or(desc_ref.name, &display_name);
        log::info!(
            "Found {} plugin(s), using {} by {} (id: {}, version: {})",
            plugin_count,
            name,
            c_string_or(desc_ref.vendor, "Unknown"),
            plugin_id,
            c_string_or(desc_ref.version, "0.0.0")
        );

        let host = Box::new(ClapHost {
            clap_version: ClapVersion::new(),
            host_data: ptr::null_mut(),
            name: HOST_NAME.as_ptr() as *const c_char,
            vendor: HOST_VENDOR.as_ptr() as *const c_char,
            url: HOST_URL.as_ptr() as *const c_char,
            version: HOST_VERSION.as_ptr() as *const c_char,
            get_extension: Some(host_get_extension),
            request_restart: Some(host_request_restart),
            request_process: Some(host_request_process),
            request_callback: Some(host_request_callback),
        });

        let plugin = match factory_ref.create_plugin {
            Some(create) => unsafe { create(factory, host.as_ref(), desc_ref.id) },
            None => ptr::null(),
        };
        if plugin.is_null() {
            return Err(deinit("Failed to create plugin instance".to_string()));
        }

        let plugin_ref = unsafe { &*plugin };
        let initialized = match plugin_ref.init {
            Some(init) => unsafe { init(plugin) },
            None => false,
        };
        if !initialized {
            if let Some(destroy) = plugin_ref.destroy {
                unsafe { destroy(plugin) };
            }
            return Err(deinit("Plugin init() failed".to_string()));
        }

        Ok(Self {
            plugin,
            entry,
            _host: host,
            _library: library,
            name,
            plugin_id,
            bundle_path: bundle_path.to_path_buf(),
            max_frames: 0,
            is_active: false,
            is_processing: false,
            input_data: Vec::new(),
            output_data: Vec::new(),
            input_ptrs: Vec::new(),
            output_ptrs: Vec::new(),
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    /// Channel counts of the main input and output ports
    ///
    /// A plugin without the audio-ports extension is assumed to be stereo.
    fn query_layout(&self) -> ChannelLayout {
        let plugin_ref = unsafe { &*self.plugin };
        let ext = match plugin_ref.get_extension {
            Some(get) => unsafe {
                get(self.plugin, CLAP_EXT_AUDIO_PORTS.as_ptr() as *const c_char)
                    as *const ClapPluginAudioPorts
            },
            None => ptr::null(),
        };
        if ext.is_null() {
            log::debug!("{} has no audio-ports extension, assuming stereo", self.name);
            return ChannelLayout::STEREO;
        }
        ports_layout(self.plugin, unsafe { &*ext })
    }

    fn start_processing(&mut self) -> bool {
        if self.is_processing {
            return true;
        }
        let plugin_ref = unsafe { &*self.plugin };
        if let Some(start) = plugin_ref.start_processing {
            if !unsafe { start(self.plugin) } {
                return false;
            }
        }
        self.is_processing = true;
        true
    }

    fn stop_processing(&mut self) {
        if !self.is_processing {
            return;
        }
        let plugin_ref = unsafe { &*self.plugin };
        if let Some(stop) = plugin_ref.stop_processing {
            unsafe { stop(self.plugin) };
        }
        self.is_processing = false;
    }
}

fn ports_layout(plugin: *const ClapPlugin, ports: &ClapPluginAudioPorts) -> ChannelLayout {
    ChannelLayout::new(
        main_port_channels(plugin, ports, true),
        main_port_channels(plugin, ports, false),
    )
}

/// Channel count of the only port in one direction
///
/// The host passes exactly one buffer per direction, so a plugin declaring
/// extra ports (a sidechain, say) or no main port reports 0 channels and is
/// rejected as an unsupported layout.
fn main_port_channels(plugin: *const ClapPlugin, ports: &ClapPluginAudioPorts, is_input: bool) -> u32 {
    let (Some(count), Some(get)) = (ports.count, ports.get) else {
        return 0;
    };
    let direction = if is_input { "input" } else { "output" };

    let port_count = unsafe { count(plugin, is_input) };
    if port_count != 1 {
        log::warn!("Plugin declares {} {} ports, expected 1", port_count, direction);
        return 0;
    }

    let mut info = ClapAudioPortInfo::zeroed();
    if !unsafe { get(plugin, 0, is_input, &mut info) } {
        return 0;
    }
    if info.flags & CLAP_AUDIO_PORT_IS_MAIN == 0 {
        log::warn!("Plugin's {} port is not a main port", direction);
        return 0;
    }
    info.channel_count
}

impl ProcessingUnit for ClapUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, sample_rate: f64, block_size: usize) -> UnitResult<ChannelLayout> {
        let layout = self.query_layout();
        if !layout.is_stereo() {
            return Ok(layout);
        }

        self.max_frames = block_size;
        self.input_data = vec![vec![0.0; block_size]; 2];
        self.output_data = vec![vec![0.0; block_size]; 2];
        self.input_ptrs = self.input_data.iter_mut().map(|c| c.as_mut_ptr()).collect();
        self.output_ptrs = self.output_data.iter_mut().map(|c| c.as_mut_ptr()).collect();

        let plugin_ref = unsafe { &*self.plugin };
        let activate = plugin_ref.activate.ok_or_else(|| UnitError::PrepareFailed {
            name: self.name.clone(),
            reason: "Plugin has no activate function".to_string(),
        })?;
        if !unsafe { activate(self.plugin, sample_rate, 1, block_size as u32) } {
            return Err(UnitError::PrepareFailed {
                name: self.name.clone(),
                reason: "activate() returned false".to_string(),
            });
        }
        self.is_active = true;

        log::info!(
            "Plugin activated: {} at {} Hz, max {} frames",
            self.name,
            sample_rate,
            block_size
        );
        Ok(layout)
    }

    fn process(&mut self, buffer: &mut UnitBuffer) -> ProcessStatus {
        let frames = buffer.frames();
        if !self.is_active || frames > self.max_frames || buffer.num_channels() < 2 {
            return ProcessStatus::Failed;
        }
        // CLAP wants start_processing on the audio thread
        if !self.start_processing() {
            return ProcessStatus::Failed;
        }

        for ch in 0..2 {
            self.input_data[ch][..frames].copy_from_slice(buffer.channel(ch));
            self.output_data[ch][..frames].fill(0.0);
        }

        let input_buffer = ClapAudioBuffer {
            data32: self.input_ptrs.as_mut_ptr(),
            data64: ptr::null_mut(),
            channel_count: 2,
            latency: 0,
            constant_mask: 0,
        };
        let mut output_buffer = ClapAudioBuffer {
            data32: self.output_ptrs.as_mut_ptr(),
            data64: ptr::null_mut(),
            channel_count: 2,
            latency: 0,
            constant_mask: 0,
        };
        let input_events = ClapInputEvents {
            ctx: ptr::null_mut(),
            size: Some(empty_input_events_size),
            get: Some(empty_input_events_get),
        };
        let output_events = ClapOutputEvents {
            ctx: ptr::null_mut(),
            try_push: Some(empty_output_events_push),
        };

        let process = ClapProcess {
            steady_time: -1,
            frames_count: frames as u32,
            transport: ptr::null(),
            audio_inputs: &input_buffer,
            audio_outputs: &mut output_buffer,
            audio_inputs_count: 1,
            audio_outputs_count: 1,
            in_events: &input_events,
            out_events: &output_events,
        };

        let plugin_ref = unsafe { &*self.plugin };
        let Some(process_fn) = plugin_ref.process else {
            return ProcessStatus::Failed;
        };
        if unsafe { process_fn(self.plugin, &process) } == CLAP_PROCESS_ERROR {
            return ProcessStatus::Failed;
        }

        for ch in 0..2 {
            buffer.channel_mut(ch).copy_from_slice(&self.output_data[ch][..frames]);
        }
        ProcessStatus::Continue
    }

    fn release(&mut self) {
        self.stop_processing();
        if self.is_active {
            let plugin_ref = unsafe { &*self.plugin };
            if let Some(deactivate) = plugin_ref.deactivate {
                unsafe { deactivate(self.plugin) };
            }
            self.is_active = false;
            log::info!("Plugin deactivated: {}", self.name);
        }
    }
}

impl Drop for ClapUnit {
    fn drop(&mut self) {
        self.release();

        let plugin_ref = unsafe { &*self.plugin };
        if let Some(destroy) = plugin_ref.destroy {
            unsafe { destroy(self.plugin) };
        }
        let entry_ref = unsafe { &*self.entry };
        if let Some(deinit) = entry_ref.deinit {
            unsafe { deinit() };
        }

        log::info!("Plugin unloaded: {}", self.name);
    }
}

/// Path of the loadable binary for a .clap bundle
///
/// On macOS a bundle is a directory (`Name.clap/Contents/MacOS/Name`);
/// elsewhere the .clap file is the shared library itself.
fn resolve_binary_path(bundle_path: &Path) -> Result<PathBuf, String> {
    if bundle_path.is_file() {
        return Ok(bundle_path.to_path_buf());
    }

    let macos_dir = bundle_path.join("Contents").join("MacOS");
    let stem = bundle_path
        .file_stem()
        .ok_or_else(|| format!("Invalid bundle path: {:?}", bundle_path))?;

    let binary = macos_dir.join(stem);
    if binary.is_file() {
        return Ok(binary);
    }

    // Binary named differently from the bundle
    if let Ok(entries) = std::fs::read_dir(&macos_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().is_none() {
                return Ok(path);
            }
        }
    }

    Err(format!("Could not find plugin binary in bundle: {:?}", bundle_path))
}

// =============================================================================
// Host callbacks
// =============================================================================

unsafe extern "C" fn host_get_extension(
    _host: *const ClapHost,
    _extension_id: *const c_char,
) -> *const std::ffi::c_void {
    ptr::null()
}

unsafe extern "C" fn host_request_restart(_host: *const ClapHost) {
    log::debug!("Plugin requested restart, ignored");
}

// May be called from the audio thread
unsafe extern "C" fn host_request_process(_host: *const ClapHost) {}

unsafe extern "C" fn host_request_callback(_host: *const ClapHost) {}
