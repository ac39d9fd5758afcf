use utoipa::OpenApi;
use crate::{error, handlers, methods, models};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_devices,
        handlers::add_device,
        handlers::get_device,
        handlers::update_device,
        handlers::remove_device,
        handlers::do_action,
        handlers::all_off,
        handlers::get_parameter,
        handlers::set_parameter,
        handlers::error_string,
    ),
    components(
        schemas(
            models::DeviceEvent,
            models::DeviceStatus,
            models::ActionRequest,
            models::ActionResponse,
            models::DeviceUpdate,
            models::ParameterValue,
            models::DeviceResult,
            models::ErrorString,
            methods::Method,
            error::ErrorBody,
        )
    ),
    tags((name = "devices", description = "RF device actuation"))
)]
pub struct ApiDoc;
