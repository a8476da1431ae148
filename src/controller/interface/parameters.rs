//! Named parameter registry backing the generic get/set API

use super::InterfaceCore;
use crate::controller::addr::{mask_to_prefix, parse_ipv4};
use crate::controller::error::{InterfaceError, InterfaceResult};
use crate::controller::state::InterfaceKind;
use serde_json::Value;

type Getter<T> = fn(&T) -> Value;
type Setter<T> = fn(&mut T, Value) -> InterfaceResult<()>;

/// One entry of a variant's parameter table
pub struct Parameter<T> {
    pub name: &'static str,
    get: Getter<T>,
    set: Option<Setter<T>>,
}

impl<T> Parameter<T> {
    pub const fn read_only(name: &'static str, get: Getter<T>) -> Self {
        Self {
            name,
            get,
            set: None,
        }
    }

    pub const fn writable(name: &'static str, get: Getter<T>, set: Setter<T>) -> Self {
        Self {
            name,
            get,
            set: Some(set),
        }
    }
}

/// Behaviour shared by the interface variants: identity, mode and the parameter table
pub trait Configurable: Sized + 'static {
    const KIND: InterfaceKind;
    const PARAMETERS: &'static [Parameter<Self>];

    fn core(&self) -> &InterfaceCore;
    fn core_mut(&mut self) -> &mut InterfaceCore;

    fn connection_type(&self) -> &'static str;
    fn set_connection_type(&mut self, value: &str) -> InterfaceResult<()>;

    /// True when the current mode obtains its address externally
    fn ip_read_only(&self) -> bool;

    fn parameter_names() -> Vec<&'static str> {
        Self::PARAMETERS.iter().map(|p| p.name).collect()
    }

    fn lookup(name: &str) -> InterfaceResult<&'static Parameter<Self>> {
        Self::PARAMETERS
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| InterfaceError::UnknownParameter {
                name: name.to_string(),
                available: Self::parameter_names().join(", "),
            })
    }

    fn get_param(&self, name: &str) -> InterfaceResult<Value> {
        let param = Self::lookup(name)?;
        Ok((param.get)(self))
    }

    /// Write a parameter and mark the interface for re-application
    fn set_param(&mut self, name: &str, value: Value) -> InterfaceResult<()> {
        let param = Self::lookup(name)?;
        let set = param
            .set
            .ok_or_else(|| InterfaceError::NotWritable(name.to_string()))?;
        set(self, value)?;
        self.core_mut().update_pending = true;
        Ok(())
    }
}

/// Extract a JSON string, naming `field` in the error
pub fn string_value(field: &str, value: Value) -> InterfaceResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(InterfaceError::InvalidValue {
            field: field.to_string(),
            detail: format!("expected a string, got {}", other),
        }),
    }
}

/// Validate an address field; `gateway` may be empty
pub fn validate_address(field: &str, value: &str) -> InterfaceResult<()> {
    match field {
        "mask" => mask_to_prefix(value).map(|_| ()),
        "gateway" if value.is_empty() => Ok(()),
        _ => parse_ipv4(field, value).map(|_| ()),
    }
}

pub fn get_device<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.core().device.as_str())
}

pub fn get_kind<T: Configurable>(_: &T) -> Value {
    Value::from(T::KIND.as_str())
}

pub fn get_connection_type<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.connection_type())
}

pub fn set_connection_type<T: Configurable>(iface: &mut T, value: Value) -> InterfaceResult<()> {
    let value = string_value("connection_type", value)?;
    iface.set_connection_type(&value)
}

pub fn get_ip<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.core().ip.as_str())
}

pub fn set_ip<T: Configurable>(iface: &mut T, value: Value) -> InterfaceResult<()> {
    let value = string_value("ip", value)?;
    validate_address("ip", &value)?;
    iface.core_mut().ip = value;
    Ok(())
}

pub fn get_mask<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.core().mask.as_str())
}

pub fn set_mask<T: Configurable>(iface: &mut T, value: Value) -> InterfaceResult<()> {
    let value = string_value("mask", value)?;
    validate_address("mask", &value)?;
    iface.core_mut().mask = value;
    Ok(())
}

pub fn get_gateway<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.core().gateway.as_str())
}

pub fn set_gateway<T: Configurable>(iface: &mut T, value: Value) -> InterfaceResult<()> {
    let value = string_value("gateway", value)?;
    validate_address("gateway", &value)?;
    iface.core_mut().gateway = value;
    Ok(())
}

pub fn get_ip_read_only<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.ip_read_only())
}

pub fn get_status<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.core().message.as_str())
}

pub fn get_update_pending<T: Configurable>(iface: &T) -> Value {
    Value::from(iface.core().update_pending)
}

/// Entries every variant exposes, in table order
macro_rules! common_parameters {
    ($($extra:expr),* $(,)?) => {
        &[
            $crate::controller::interface::parameters::Parameter::read_only(
                "device",
                $crate::controller::interface::parameters::get_device::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::read_only(
                "type",
                $crate::controller::interface::parameters::get_kind::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::writable(
                "connection_type",
                $crate::controller::interface::parameters::get_connection_type::<Self>,
                $crate::controller::interface::parameters::set_connection_type::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::writable(
                "ip",
                $crate::controller::interface::parameters::get_ip::<Self>,
                $crate::controller::interface::parameters::set_ip::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::writable(
                "mask",
                $crate::controller::interface::parameters::get_mask::<Self>,
                $crate::controller::interface::parameters::set_mask::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::writable(
                "gateway",
                $crate::controller::interface::parameters::get_gateway::<Self>,
                $crate::controller::interface::parameters::set_gateway::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::read_only(
                "ip_read_only",
                $crate::controller::interface::parameters::get_ip_read_only::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::read_only(
                "status",
                $crate::controller::interface::parameters::get_status::<Self>,
            ),
            $crate::controller::interface::parameters::Parameter::read_only(
                "update_pending",
                $crate::controller::interface::parameters::get_update_pending::<Self>,
            ),
            $($extra,)*
        ]
    };
}

pub(crate) use common_parameters;
