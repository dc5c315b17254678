//! Service Control Manager backend

use super::{ServiceCreationOptions, ServiceManager, ServiceStartType, ServiceState};
use crate::ServiceControlError;
use std::ffi::c_void;

use windows::core::PCWSTR;
use windows::Win32::System::Services::*;

const SERVICE_SID_TYPE_UNRESTRICTED: u32 = 0x0000_0001;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Double null terminated list, as `lpDependencies` expects
fn wide_multi(items: &[String]) -> Vec<u16> {
    let mut buffer: Vec<u16> = items.iter().flat_map(|item| wide(item)).collect();
    buffer.push(0);
    buffer
}

/// Win32 error code carried by a `windows` error (HRESULT_FROM_WIN32 unwrapped)
fn win32_code(error: &windows::core::Error) -> u32 {
    let hr = error.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

fn control_error(error: windows::core::Error) -> ServiceControlError {
    ServiceControlError::from_code(win32_code(&error), error.message())
}

/// Service or manager handle closed on drop
struct ScHandle(SC_HANDLE);

impl Drop for ScHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseServiceHandle(self.0);
        }
    }
}

fn open_manager(access: u32) -> Result<ScHandle, ServiceControlError> {
    let handle = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), access) }.map_err(control_error)?;
    Ok(ScHandle(handle))
}

fn open_service(name: &str, access: u32) -> Result<ScHandle, ServiceControlError> {
    let manager = open_manager(SC_MANAGER_CONNECT)?;
    let name_wide = wide(name);
    let handle =
        unsafe { OpenServiceW(manager.0, PCWSTR(name_wide.as_ptr()), access) }.map_err(control_error)?;
    Ok(ScHandle(handle))
}

/// Reads `QUERY_SERVICE_CONFIGW` into an owned buffer and hands it to `read`
fn with_config<T>(name: &str, read: impl FnOnce(&QUERY_SERVICE_CONFIGW) -> T) -> Result<T, ServiceControlError> {
    let service = open_service(name, SERVICE_QUERY_CONFIG)?;

    let mut needed: u32 = 0;
    if let Err(e) = unsafe { QueryServiceConfigW(service.0, None, 0, &mut needed) } {
        if win32_code(&e) != ERROR_INSUFFICIENT_BUFFER {
            return Err(control_error(e));
        }
    }
    if needed == 0 {
        return Err(ServiceControlError::Os {
            code: 0,
            message: format!("service '{}' returned no configuration data", name),
        });
    }

    // u64 backing keeps the struct pointer aligned
    let mut buffer = vec![0u64; (needed as usize).div_ceil(8)];
    let config = buffer.as_mut_ptr() as *mut QUERY_SERVICE_CONFIGW;
    unsafe { QueryServiceConfigW(service.0, Some(config), needed, &mut needed) }.map_err(control_error)?;

    Ok(read(unsafe { &*config }))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScmServiceManager;

impl ScmServiceManager {
    pub fn new() -> Self {
        Self
    }
}

impl ServiceManager for ScmServiceManager {
    fn create(&self, name: &str, options: &ServiceCreationOptions) -> Result<(), ServiceControlError> {
        let manager = open_manager(SC_MANAGER_CREATE_SERVICE)?;
        let name_wide = wide(name);
        let path_wide = wide(&options.path_and_arguments);
        let dependencies = wide_multi(&options.dependencies);
        let dependencies_ptr = if options.dependencies.is_empty() {
            PCWSTR::null()
        } else {
            PCWSTR(dependencies.as_ptr())
        };

        let service = unsafe {
            CreateServiceW(
                manager.0,
                PCWSTR(name_wide.as_ptr()),
                PCWSTR(name_wide.as_ptr()),
                SERVICE_ALL_ACCESS,
                SERVICE_WIN32_OWN_PROCESS,
                SERVICE_DEMAND_START,
                SERVICE_ERROR_NORMAL,
                PCWSTR(path_wide.as_ptr()),
                PCWSTR::null(),
                None,
                dependencies_ptr,
                PCWSTR::null(),
                PCWSTR::null(),
            )
        }
        .map_err(control_error)?;
        let service = ScHandle(service);

        if options.is_unrestricted {
            let sid_info = SERVICE_SID_INFO {
                dwServiceSidType: SERVICE_SID_TYPE_UNRESTRICTED,
            };
            unsafe {
                ChangeServiceConfig2W(
                    service.0,
                    SERVICE_CONFIG_SERVICE_SID_INFO,
                    Some(&sid_info as *const SERVICE_SID_INFO as *const c_void),
                )
            }
            .map_err(control_error)?;
        }

        log::info!("Service '{}' created", name);
        Ok(())
    }

    fn query_state(&self, name: &str) -> Result<ServiceState, ServiceControlError> {
        let service = open_service(name, SERVICE_QUERY_STATUS)?;
        let mut status = SERVICE_STATUS::default();
        unsafe { QueryServiceStatus(service.0, &mut status) }.map_err(control_error)?;

        ServiceState::from_code(status.dwCurrentState.0).ok_or_else(|| ServiceControlError::Os {
            code: status.dwCurrentState.0,
            message: "unknown service state".to_string(),
        })
    }

    fn start_type(&self, name: &str) -> Result<ServiceStartType, ServiceControlError> {
        with_config(name, |config| match config.dwStartType {
            SERVICE_BOOT_START => ServiceStartType::Boot,
            SERVICE_SYSTEM_START => ServiceStartType::System,
            SERVICE_AUTO_START => ServiceStartType::Automatic,
            SERVICE_DISABLED => ServiceStartType::Disabled,
            _ => ServiceStartType::Demand,
        })
    }

    fn set_demand_start(&self, name: &str) -> Result<(), ServiceControlError> {
        let service = open_service(name, SERVICE_CHANGE_CONFIG)?;
        unsafe {
            ChangeServiceConfigW(
                service.0,
                ENUM_SERVICE_TYPE(SERVICE_NO_CHANGE),
                SERVICE_DEMAND_START,
                SERVICE_ERROR(SERVICE_NO_CHANGE),
                PCWSTR::null(),
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            )
        }
        .map_err(control_error)
    }

    fn binary_path(&self, name: &str) -> Result<String, ServiceControlError> {
        with_config(name, |config| unsafe { config.lpBinaryPathName.to_string() }.unwrap_or_default())
    }

    fn set_binary_path(&self, name: &str, path_and_arguments: &str) -> Result<(), ServiceControlError> {
        let service = open_service(name, SERVICE_CHANGE_CONFIG)?;
        let path_wide = wide(path_and_arguments);
        unsafe {
            ChangeServiceConfigW(
                service.0,
                ENUM_SERVICE_TYPE(SERVICE_NO_CHANGE),
                SERVICE_START_TYPE(SERVICE_NO_CHANGE),
                SERVICE_ERROR(SERVICE_NO_CHANGE),
                PCWSTR(path_wide.as_ptr()),
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            )
        }
        .map_err(control_error)
    }

    fn start(&self, name: &str) -> Result<(), ServiceControlError> {
        let service = open_service(name, SERVICE_START | SERVICE_QUERY_STATUS)?;
        unsafe { StartServiceW(service.0, None) }.map_err(control_error)
    }

    fn stop(&self, name: &str) -> Result<(), ServiceControlError> {
        let service = open_service(name, SERVICE_STOP | SERVICE_QUERY_STATUS)?;
        let mut status = SERVICE_STATUS::default();
        unsafe { ControlService(service.0, SERVICE_CONTROL_STOP, &mut status) }.map_err(control_error)
    }
}
