//! The functions callable from templates.
//!
//! All functions take named arguments, e.g.
//! `{{ getVolumePathByName(container=podSpec.containers[0], name="data") }}`. Structural
//! lookups return `null` (or an empty string for string results) when nothing matches, so
//! templates can test for them with `{% if %}`.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Container;
use serde_json::Value;
use tera::{Error, Result, Tera};

use crate::render::{
    env::EnvResolver,
    error_chain,
    resources::{
        buffer_pool_size, container_cpu, container_memory, shared_buffers, storage_bytes,
    },
};

type Args = HashMap<String, Value>;

/// Registers every function on `tera`.
pub(crate) fn register(tera: &mut Tera, resolver: EnvResolver) {
    tera.register_function("getEnvByName", move |args: &Args| {
        get_env_by_name(&resolver, args)
    });
    tera.register_function("getArgByName", get_arg_by_name);
    tera.register_function("getPVCByName", get_pvc_by_name);
    tera.register_function("getVolumePathByName", get_volume_path_by_name);
    tera.register_function("getPortByName", get_port_by_name);
    tera.register_function("getContainerByName", get_container_by_name);
    tera.register_function("getContainerCPU", get_container_cpu);
    tera.register_function("getContainerMemory", get_container_memory);
    tera.register_function("getContainerRequestMemory", get_container_request_memory);
    tera.register_function("getComponentPVCSizeByName", get_component_pvc_size_by_name);
    tera.register_function("getPVCSize", get_pvc_size);
    tera.register_function("callBufferSizeByResource", call_buffer_size_by_resource);
    tera.register_function("callSharedBuffersByResource", call_shared_buffers_by_resource);
}

fn get_env_by_name(resolver: &EnvResolver, args: &Args) -> Result<Value> {
    let container = required(args, "container")?;
    let container: Container = serde_json::from_value(container.clone())
        .map_err(|error| Error::msg(format!("invalid container: {error}")))?;
    let name = required_str(args, "name")?;

    resolver
        .resolve(&container, name)
        .map(Value::String)
        .map_err(|error| Error::msg(error_chain(&error)))
}

/// Finds `--name=value`, `-name=value` or `name=value` in the args of the container.
fn get_arg_by_name(args: &Args) -> Result<Value> {
    let container = required(args, "container")?;
    let name = required_str(args, "name")?;

    let value = items(container, "args")
        .filter_map(Value::as_str)
        .find_map(|arg| {
            let (key, value) = arg.split_once('=')?;
            (key.trim_start_matches('-') == name).then(|| value.to_owned())
        })
        .unwrap_or_default();
    Ok(Value::String(value))
}

fn get_pvc_by_name(args: &Args) -> Result<Value> {
    let volumes = required(args, "volumes")?;
    let name = required_str(args, "name")?;
    Ok(find_named(volumes.as_array(), name))
}

fn get_volume_path_by_name(args: &Args) -> Result<Value> {
    let container = required(args, "container")?;
    let name = required_str(args, "name")?;

    let path = items(container, "volumeMounts")
        .find(|mount| has_name(mount, name))
        .and_then(|mount| mount.get("mountPath"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(Value::String(path.to_owned()))
}

fn get_port_by_name(args: &Args) -> Result<Value> {
    let container = required(args, "container")?;
    let name = required_str(args, "name")?;
    Ok(find_named(
        container.get("ports").and_then(Value::as_array),
        name,
    ))
}

fn get_container_by_name(args: &Args) -> Result<Value> {
    let containers = required(args, "containers")?;
    let name = required_str(args, "name")?;
    Ok(find_named(containers.as_array(), name))
}

/// The CPU limit in whole cores, rounded up. `0` without a limit.
fn get_container_cpu(args: &Args) -> Result<Value> {
    let container = required(args, "container")?;
    let cpu = container_cpu(container).map_err(invalid_quantity)?;
    Ok(Value::from(cpu.map_or(0, |cpu| cpu.as_cores_ceil())))
}

/// The memory limit in bytes. `0` without a limit.
fn get_container_memory(args: &Args) -> Result<Value> {
    memory_bytes(args, "limits")
}

/// The memory request in bytes. `0` without a request.
fn get_container_request_memory(args: &Args) -> Result<Value> {
    memory_bytes(args, "requests")
}

/// The requested storage of the volume claim template `name` of a component, in bytes.
fn get_component_pvc_size_by_name(args: &Args) -> Result<Value> {
    let component = required(args, "component")?;
    let name = required_str(args, "name")?;

    let template = find_named(
        component
            .get("volumeClaimTemplates")
            .and_then(Value::as_array),
        name,
    );
    pvc_size(&template)
}

/// The requested storage of a volume claim (template), in bytes.
fn get_pvc_size(args: &Args) -> Result<Value> {
    pvc_size(required(args, "pvc")?)
}

/// The recommended InnoDB buffer pool size, e.g. `4096M`. Pass `shared=true` for instances
/// sharing the memory of the pod.
fn call_buffer_size_by_resource(args: &Args) -> Result<Value> {
    let container = required(args, "container")?;
    let shared = args.get("shared").and_then(Value::as_bool).unwrap_or_default();

    let memory = container_memory(container, "limits").map_err(invalid_quantity)?;
    let cores = container_cpu(container)
        .map_err(invalid_quantity)?
        .map_or(0, |cpu| cpu.as_cores_ceil());
    Ok(Value::String(buffer_pool_size(memory, cores, shared)))
}

/// The recommended PostgreSQL `shared_buffers`, e.g. `2048MB`.
fn call_shared_buffers_by_resource(args: &Args) -> Result<Value> {
    let container = required(args, "container")?;
    let memory = container_memory(container, "limits").map_err(invalid_quantity)?;
    Ok(Value::String(shared_buffers(memory)))
}

fn memory_bytes(args: &Args, kind: &str) -> Result<Value> {
    let container = required(args, "container")?;
    let memory = container_memory(container, kind).map_err(invalid_quantity)?;
    Ok(Value::from(memory.map_or(0, |memory| memory.as_bytes())))
}

fn pvc_size(pvc: &Value) -> Result<Value> {
    let storage = pvc
        .pointer("/spec/resources/requests/storage")
        .and_then(Value::as_str);
    match storage {
        Some(storage) => storage_bytes(storage)
            .map(Value::from)
            .map_err(invalid_quantity),
        None => Ok(Value::Null),
    }
}

fn required<'a>(args: &'a Args, name: &str) -> Result<&'a Value> {
    args.get(name)
        .ok_or_else(|| Error::msg(format!("missing argument {name:?}")))
}

fn required_str<'a>(args: &'a Args, name: &str) -> Result<&'a str> {
    required(args, name)?
        .as_str()
        .ok_or_else(|| Error::msg(format!("argument {name:?} must be a string")))
}

/// The items of the array `field` of `object`, none if it is missing.
fn items<'a>(object: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> {
    object
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn has_name(item: &Value, name: &str) -> bool {
    item.get("name").and_then(Value::as_str) == Some(name)
}

fn find_named(items: Option<&Vec<Value>>, name: &str) -> Value {
    items
        .into_iter()
        .flatten()
        .find(|item| has_name(item, name))
        .cloned()
        .unwrap_or(Value::Null)
}

fn invalid_quantity(error: impl std::error::Error) -> Error {
    Error::msg(format!("invalid quantity: {}", error_chain(&error)))
}
