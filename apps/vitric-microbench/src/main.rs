//! Vitric micro-benchmark.
//!
//! Samples a source image repeatedly in a compute shader and reports the
//! per-repeat device time measured with bracketing timestamps.

use tracing::{error, info};
use vitric_gpu::{
    Command, Context, Image, ImageUsage, MemoryAccess, PixelFormat, ResourceType, SubmitType,
    Task,
};

const EXTENT: u32 = 128;
const WORKGROUP: u32 = 8;
const BENCHMARK_REPEATS: usize = 200;

fn enumerate_devices() -> vitric_gpu::Result<()> {
    for idx in 0..vitric_gpu::device_count()? {
        if let Some(desc) = vitric_gpu::describe_device(idx)? {
            info!("device #{idx}: {desc}");
        }
    }
    Ok(())
}

fn shader_source(repeats: usize) -> String {
    format!(
        r#"
        #version 460 core

        layout(local_size_x_id = 0, local_size_y_id = 1, local_size_z_id = 2) in;
        layout(set = 0, binding = 0) uniform sampler2D src;
        layout(set = 0, binding = 1, rgba8) writeonly uniform image2D dst;
        void main() {{
            vec2 coord = vec2(gl_GlobalInvocationID.xy) /
                vec2(gl_NumWorkGroups.xy * gl_WorkGroupSize.xy);

            vec4 col = vec4(0.0);
            for (int i = 0; i < {repeats}; ++i) {{
                col += texture(src, coord);
            }}
            imageStore(dst, ivec2(gl_GlobalInvocationID.xy), col);
        }}
        "#
    )
}

fn build_image(ctxt: &Context, label: &str) -> vitric_gpu::Result<Image> {
    Image::builder(ctxt)
        .width(EXTENT)
        .height(EXTENT)
        .format(PixelFormat::R8G8B8A8_UNORM)
        .usage(ImageUsage::SAMPLED | ImageUsage::STORAGE)
        .label(label)
        .build()
}

fn build_task(ctxt: &Context, spirv: &[u32], label: &str) -> vitric_gpu::Result<Task> {
    Task::compute(ctxt)
        .workgroup_size(WORKGROUP, WORKGROUP, 1)
        .spirv(spirv)
        .entry_name("main")
        .resource(ResourceType::SampledImage)
        .resource(ResourceType::StorageImage)
        .label(label)
        .build()
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    vitric_gpu::initialize()?;
    enumerate_devices()?;

    let ctxt = Context::builder().label("microbench").build()?;

    let src = build_image(&ctxt, "src")?;
    let dst = build_image(&ctxt, "dst")?;

    // Both images leave UNDEFINED before the first dispatch touches them.
    {
        let mut drain = vitric_gpu::CommandDrain::new(&ctxt)?;
        drain.submit(&[
            Command::SetSubmitType(SubmitType::Compute),
            Command::ImageBarrier {
                img: &src,
                src_usage: ImageUsage::empty(),
                dst_usage: ImageUsage::SAMPLED,
                src_access: MemoryAccess::None,
                dst_access: MemoryAccess::ReadOnly,
            },
            Command::ImageBarrier {
                img: &dst,
                src_usage: ImageUsage::empty(),
                dst_usage: ImageUsage::STORAGE,
                src_access: MemoryAccess::None,
                dst_access: MemoryAccess::WriteOnly,
            },
        ])?;
        drain.wait()?;
    }

    let warmup_art = vitric_shaders::compile_comp(&shader_source(10), "main")?;
    let benchmark_art = vitric_shaders::compile_comp(&shader_source(BENCHMARK_REPEATS), "main")?;
    if let Err(e) = benchmark_art.save("microbench") {
        error!("failed to persist benchmark artifact: {e}");
    }

    let groups = EXTENT / WORKGROUP;

    let warmup_task = build_task(&ctxt, &warmup_art.comp_spv, "warmup")?;
    let mut warmup = warmup_task
        .compute_invocation()
        .resource(src.view())
        .resource(dst.view())
        .workgroup_count(groups, groups, 1)
        .build()?;
    warmup.submit()?;
    warmup.wait()?;

    let benchmark_task = build_task(&ctxt, &benchmark_art.comp_spv, "benchmark")?;
    let mut benchmark = benchmark_task
        .compute_invocation()
        .timed()
        .resource(src.view())
        .resource(dst.view())
        .workgroup_count(groups, groups, 1)
        .build()?;
    benchmark.submit()?;
    benchmark.wait()?;

    let time_us = benchmark.time_us()?;
    println!("{}ms", time_us / 1e3 / BENCHMARK_REPEATS as f64);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        error!("application threw an exception");
        error!("{e}");
        error!("application cannot continue");
        std::process::exit(1);
    }
}
