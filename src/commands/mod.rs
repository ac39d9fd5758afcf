// commands/mod.rs
//! Numeric command surface over a [`DeviceManager`].
//!
//! Commands take a device id and answer with a result code, metadata setters
//! answer with a success flag. Nothing here panics or returns `Err`, so a
//! caller looping over devices always gets to the next one.

use crate::{
    devices::{DeviceManager, Field},
    error::{ResultCode, to_code},
    methods::{Method, Methods, mask_unsupported_methods},
};

async fn run(manager: &DeviceManager, id: i32, method: Method, level: u8) -> i32 {
    to_code(&manager.do_action(id, method, level).await.map(|_| ()))
}

pub async fn turn_on(manager: &DeviceManager, id: i32) -> i32 {
    run(manager, id, Method::TurnOn, 0).await
}

pub async fn turn_off(manager: &DeviceManager, id: i32) -> i32 {
    run(manager, id, Method::TurnOff, 0).await
}

pub async fn bell(manager: &DeviceManager, id: i32) -> i32 {
    run(manager, id, Method::Bell, 0).await
}

pub async fn dim(manager: &DeviceManager, id: i32, level: u8) -> i32 {
    run(manager, id, Method::Dim, level).await
}

pub async fn toggle(manager: &DeviceManager, id: i32) -> i32 {
    run(manager, id, Method::Toggle, 0).await
}

pub async fn learn(manager: &DeviceManager, id: i32) -> i32 {
    run(manager, id, Method::Learn, 0).await
}

/// Executes a raw method bit. Anything but a single known bit is unsupported.
pub async fn execute(manager: &DeviceManager, id: i32, method: u32, level: u8) -> i32 {
    match Method::from_bits(method) {
        Some(method) => run(manager, id, method, level).await,
        None => ResultCode::MethodNotSupported.code(),
    }
}

/// The device's methods restricted to those the caller understands.
pub async fn methods(manager: &DeviceManager, id: i32, methods_supported: u32) -> u32 {
    match manager.device(id) {
        Some(device) => mask_unsupported_methods(
            device.methods().await,
            Methods::from_bits_truncate(methods_supported),
        )
        .bits(),
        None => 0,
    }
}

pub fn number_of_devices(manager: &DeviceManager) -> i32 {
    manager.count() as i32
}

/// Id of the device at `index` in id order, or `NOT_FOUND`.
pub fn device_id(manager: &DeviceManager, index: i32) -> i32 {
    usize::try_from(index)
        .ok()
        .and_then(|i| manager.ids().get(i).copied())
        .unwrap_or(ResultCode::NotFound.code())
}

pub fn error_string(code: i32) -> &'static str {
    ResultCode::from_code(code)
        .unwrap_or(ResultCode::Unknown)
        .message()
}

pub async fn name(manager: &DeviceManager, id: i32) -> String {
    match manager.device(id) {
        Some(device) => device.name().await,
        None => String::new(),
    }
}

pub async fn set_name(manager: &DeviceManager, id: i32, name: &str) -> bool {
    manager.set_field(id, Field::Name, name).await
}

pub async fn vendor(manager: &DeviceManager, id: i32) -> String {
    match manager.device(id) {
        Some(device) => device.vendor().await,
        None => String::new(),
    }
}

pub async fn set_vendor(manager: &DeviceManager, id: i32, vendor: &str) -> bool {
    manager.set_field(id, Field::Vendor, vendor).await
}

pub async fn model(manager: &DeviceManager, id: i32) -> String {
    match manager.device(id) {
        Some(device) => device.model().await,
        None => String::new(),
    }
}

pub async fn set_model(manager: &DeviceManager, id: i32, model: &str) -> bool {
    manager.set_field(id, Field::Model, model).await
}

pub async fn protocol(manager: &DeviceManager, id: i32) -> String {
    match manager.device(id) {
        Some(device) => device.protocol_name().await,
        None => String::new(),
    }
}

pub async fn set_protocol(manager: &DeviceManager, id: i32, protocol: &str) -> bool {
    manager.set_field(id, Field::Protocol, protocol).await
}

/// A device parameter, or `default` when the device or the key is missing.
pub async fn argument(manager: &DeviceManager, id: i32, key: &str, default: &str) -> String {
    match manager.device(id) {
        Some(device) => device.parameter(key, default).await,
        None => default.to_string(),
    }
}

pub async fn set_argument(manager: &DeviceManager, id: i32, key: &str, value: &str) -> bool {
    manager.set_parameter(id, key, value).await
}

pub async fn add_device(manager: &DeviceManager) -> i32 {
    manager.add_device().await
}

pub async fn remove_device(manager: &DeviceManager, id: i32) -> bool {
    manager.remove_device(id).await
}

/// Turns everything off; one code per attempted device.
pub async fn all_off(manager: &DeviceManager) -> Vec<(i32, i32)> {
    manager
        .all_off()
        .await
        .into_iter()
        .map(|(id, result)| (id, to_code(&result.map(|_| ()))))
        .collect()
}
