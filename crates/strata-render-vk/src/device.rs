// SPDX-License-Identifier: CEPL-1.0
//! Instance, window surface, physical and logical device.
//!
//! Everything here lives for the whole backend and is torn down last, in
//! [`DeviceContext::destroy`].
use std::ffi::{c_char, CStr, CString};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

#[cfg(debug_assertions)]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[cfg(debug_assertions)]
type DebugState = Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>;
#[cfg(not(debug_assertions))]
type DebugState = ();

pub struct DeviceContext {
    _entry: Entry,
    pub instance: Instance,
    debug: DebugState,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    /// Long-lived pool; command buffers are reset individually.
    pub cmd_pool: vk::CommandPool,
    pub device_name: String,
}

/// Index of the first memory type allowed by `type_bits` whose flags
/// contain `required`.
///
/// No match is an error: the caller cannot continue without the allocation.
pub fn select_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or_else(|| {
            anyhow!("no memory type in mask {type_bits:#x} has properties {required:?}")
        })
}

/// Vulkan timeouts are nanoseconds with `u64::MAX` meaning forever.
pub(crate) fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |d| d.as_nanos().min(u64::MAX as u128) as u64)
}

/// Lower is better.
fn device_type_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        _ => 4,
    }
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else {
        tracing::debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

/// Turn on validation and the debug messenger extension where installed.
/// Returns whether the messenger can be created.
#[cfg(debug_assertions)]
unsafe fn enable_debug_layers(
    entry: &Entry,
    extensions: &mut Vec<*const c_char>,
    layers: &mut Vec<*const c_char>,
) -> bool {
    if has_layer(entry, VALIDATION_LAYER) {
        layers.push(VALIDATION_LAYER.as_ptr());
    } else {
        debug!("validation layer not installed");
    }
    if has_instance_extension(entry, debug_utils::NAME) {
        extensions.push(debug_utils::NAME.as_ptr());
        true
    } else {
        false
    }
}

#[cfg(debug_assertions)]
unsafe fn has_instance_extension(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_extension_properties(None)
        .map(|exts| {
            exts.iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
        })
        .unwrap_or(false)
}

#[cfg(debug_assertions)]
unsafe fn has_layer(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == name)
        })
        .unwrap_or(false)
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
) -> Result<(Instance, bool)> {
    let app_name = CString::new("Strata")?;
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        p_engine_name: app_name.as_ptr(),
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    #[allow(unused_mut)]
    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    #[allow(unused_mut)]
    let mut layers: Vec<*const c_char> = Vec::new();

    #[cfg(debug_assertions)]
    let debug_utils = enable_debug_layers(entry, &mut extensions, &mut layers);
    #[cfg(not(debug_assertions))]
    let debug_utils = false;

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("vkCreateInstance")?;
    Ok((instance, debug_utils))
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader.create_debug_utils_messenger(&ci, None)?;
    Ok((loader, messenger))
}

unsafe fn supports_swapchain(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .map(|exts| {
            exts.iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
        })
        .unwrap_or(false)
}

/// Best-ranked device with a queue family that can both draw and present
/// to `surface`.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let mut best: Option<(u32, vk::PhysicalDevice, u32)> = None;
    for phys in instance.enumerate_physical_devices()? {
        if !supports_swapchain(instance, phys) {
            continue;
        }
        let props = instance.get_physical_device_properties(phys);
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let family = qprops.iter().enumerate().find_map(|(i, q)| {
            let present = surface_loader
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false);
            (q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present).then_some(i as u32)
        });
        let Some(family) = family else { continue };
        let rank = device_type_rank(props.device_type);
        if best.map_or(true, |(r, _, _)| rank < r) {
            best = Some((rank, phys, family));
        }
    }
    best.map(|(_, phys, family)| (phys, family))
        .ok_or_else(|| anyhow!("no GPU can both render and present to this window"))
}

struct OpenedDevice {
    phys: vk::PhysicalDevice,
    queue_family: u32,
    device: ash::Device,
    queue: vk::Queue,
    cmd_pool: vk::CommandPool,
    device_name: String,
}

/// Logical device, queue and command pool. Destroys whatever it created
/// before returning an error.
unsafe fn open_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<OpenedDevice> {
    let (phys, queue_family) = pick_device_and_queue(instance, surface_loader, surface)?;
    let props = instance.get_physical_device_properties(phys);
    let device_name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let queue = device.get_device_queue(queue_family, 0);

    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    let cmd_pool = match device.create_command_pool(&pool_info, None) {
        Ok(pool) => pool,
        Err(e) => {
            device.destroy_device(None);
            return Err(anyhow::Error::new(e).context("create_command_pool"));
        }
    };

    Ok(OpenedDevice {
        phys,
        queue_family,
        device,
        queue,
        cmd_pool,
        device_name,
    })
}

/// Debug messenger (if any) and the instance itself.
unsafe fn destroy_instance(instance: &Instance, debug: &mut DebugState) {
    #[cfg(debug_assertions)]
    if let Some((loader, messenger)) = debug.take() {
        loader.destroy_debug_utils_messenger(messenger, None);
    }
    #[cfg(not(debug_assertions))]
    let _ = debug;
    instance.destroy_instance(None);
}

impl DeviceContext {
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let entry = Entry::linked();

        let dh: RawDisplayHandle = display.display_handle()?.as_raw();
        let wh: RawWindowHandle = window.window_handle()?.as_raw();

        let (instance, _debug_utils) = create_instance(&entry, dh)?;

        #[cfg(debug_assertions)]
        let mut debug: DebugState = if _debug_utils {
            match create_debug_messenger(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::warn!("debug messenger unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };
        #[cfg(not(debug_assertions))]
        let mut debug: DebugState = ();

        let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
            Ok(surface) => surface,
            Err(e) => {
                destroy_instance(&instance, &mut debug);
                return Err(anyhow::Error::new(e).context("create_surface"));
            }
        };
        let surface_loader = surface::Instance::new(&entry, &instance);

        let opened = match open_device(&instance, &surface_loader, surface) {
            Ok(opened) => opened,
            Err(e) => {
                surface_loader.destroy_surface(surface, None);
                destroy_instance(&instance, &mut debug);
                return Err(e);
            }
        };
        let swapchain_loader = swapchain::Device::new(&instance, &opened.device);
        let mem_props = instance.get_physical_device_memory_properties(opened.phys);

        info!(
            gpu = %opened.device_name,
            queue_family = opened.queue_family,
            "vulkan device ready"
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys: opened.phys,
            device: opened.device,
            queue_family: opened.queue_family,
            queue: opened.queue,
            swapchain_loader,
            mem_props,
            cmd_pool: opened.cmd_pool,
            device_name: opened.device_name,
        })
    }

    pub fn memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Result<u32> {
        select_memory_type(&self.mem_props, type_bits, required)
    }

    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buf = self.device.create_buffer(&bci, None)?;
        let req = self.device.get_buffer_memory_requirements(buf);
        let mem = match self.allocate(req, props) {
            Ok(mem) => mem,
            Err(e) => {
                self.device.destroy_buffer(buf, None);
                return Err(e);
            }
        };
        if let Err(e) = self.device.bind_buffer_memory(buf, mem, 0) {
            self.device.destroy_buffer(buf, None);
            self.device.free_memory(mem, None);
            return Err(anyhow::Error::new(e).context("bind_buffer_memory"));
        }
        Ok((buf, mem))
    }

    pub unsafe fn allocate(
        &self,
        req: vk::MemoryRequirements,
        props: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.memory_type(req.memory_type_bits, props)?,
            ..Default::default()
        };
        Ok(self.device.allocate_memory(&mai, None)?)
    }

    /// Copy `bytes` into a new device-local buffer through a staging buffer.
    /// Blocks until the copy has finished.
    pub unsafe fn upload_device_local(
        &self,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let size = bytes.len() as vk::DeviceSize;
        let (staging, staging_mem) = self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let result = self.copy_through(staging, staging_mem, usage, bytes);
        self.device.destroy_buffer(staging, None);
        self.device.free_memory(staging_mem, None);
        result
    }

    unsafe fn copy_through(
        &self,
        staging: vk::Buffer,
        staging_mem: vk::DeviceMemory,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let size = bytes.len() as vk::DeviceSize;
        let ptr = self
            .device
            .map_memory(staging_mem, 0, size, vk::MemoryMapFlags::empty())?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
        self.device.unmap_memory(staging_mem);

        let (dst, dst_mem) = self.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = self.device.allocate_command_buffers(&ai)?[0];
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        let copied = (|| -> Result<()> {
            self.device.begin_command_buffer(cmd, &bi)?;
            self.device
                .cmd_copy_buffer(cmd, staging, dst, std::slice::from_ref(&region));
            self.device.end_command_buffer(cmd)?;
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())?;
            self.device.queue_wait_idle(self.queue)?;
            Ok(())
        })();
        self.device
            .free_command_buffers(self.cmd_pool, std::slice::from_ref(&cmd));

        match copied {
            Ok(()) => Ok((dst, dst_mem)),
            Err(e) => {
                self.device.destroy_buffer(dst, None);
                self.device.free_memory(dst_mem, None);
                Err(e.context("staging copy"))
            }
        }
    }

    /// Destroy the device, surface and instance. Every child object must
    /// already be gone.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_command_pool(self.cmd_pool, None);
        self.device.destroy_device(None);
        self.surface_loader.destroy_surface(self.surface, None);
        destroy_instance(&self.instance, &mut self.debug);
        debug!("vulkan instance destroyed");
    }
}
