use rust_cl_handles::{
    ClError, ClResult, Context, ContextProperties, Device, DeviceType, Notify, Platform,
    QueueProperties, Runtime, VectorType,
};

/// Prints the attributes every device has, then the optional ones that are supported.
fn print_device(device: &Device) {
    println!("    Device: {}", device.name());
    println!("      Type: {}", device.device_type());
    println!("      Vendor: {} ({:#x})", device.vendor(), device.vendor_id());
    println!("      Version: {}", device.version());
    println!("      Driver version: {}", device.driver_version());
    println!("      Compute units: {}", device.max_compute_units());
    println!("      Work item sizes: {:?}", device.max_work_item_sizes());
    println!("      Work group size: {}", device.max_work_group_size());
    println!("      Global memory: {} bytes", device.global_mem_size());
    println!("      Local memory: {} bytes", device.local_mem_size());
    println!("      Single precision: {}", device.single_fp_config());
    println!("      Execution: {}", device.execution_capabilities());

    if let Ok(version) = device.opencl_c_version() {
        println!("      OpenCL C: {}", version);
    }
    match device.double_fp_config() {
        Ok(config) => println!("      Double precision: {}", config),
        Err(ClError::InvalidValue) => println!("      Double precision: unsupported"),
        Err(error) => println!("      Double precision: {}", error),
    }
    if let Ok(width) = device.preferred_vector_width(VectorType::Float) {
        println!("      Preferred float vector width: {}", width);
    }
    if let Ok(max) = device.partition_max_sub_devices() {
        println!("      Max sub-devices: {}", max);
    }
}

/// Creates a context and a queue on the first device, to check the platform actually works.
fn smoke_test(platform: &Platform, devices: &[Device]) -> ClResult<()> {
    let notify = Notify::new(|notification| {
        eprintln!("OpenCL error: {}", notification.errinfo());
    });
    let properties = ContextProperties::new().platform(platform);
    let context = Context::with_notify(devices, properties, notify)?;
    let queue = context.create_command_queue(&devices[0], QueueProperties::empty())?;
    queue.finish()?;
    println!(
        "    Context with {} devices and a queue on {} works.",
        context.num_devices()?,
        queue.device().name()
    );
    Ok(())
}

fn main() -> ClResult<()> {
    let runtime = Runtime::native();
    for platform in runtime.platforms()? {
        println!("Platform: {}", platform.name()?);
        println!("  Vendor: {}", platform.vendor()?);
        println!("  Version: {}", platform.version()?);
        println!("  Profile: {}", platform.profile()?);

        let devices = match platform.devices(DeviceType::ALL) {
            Ok(devices) => devices,
            Err(ClError::DeviceNotFound) => {
                println!("  No devices.");
                continue;
            }
            Err(error) => return Err(error),
        };
        for device in &devices {
            print_device(device);
        }
        if let Err(error) = smoke_test(&platform, &devices) {
            println!("    Creating a context failed: {}", error);
        }
    }
    Ok(())
}
