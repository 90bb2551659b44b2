//! End-to-end tests against a real device.
//!
//! These tests require a GPU and will be skipped in CI without GPU support.

use vitric_gpu::{
    Buffer, Command, CommandDrain, Context, Image, ImageUsage, MemoryAccess, PixelFormat,
    ResourceType, SubmitType, Task,
};

const EXTENT: u32 = 128;
const TEXEL_BYTES: u32 = 4;

fn test_ctxt() -> Context {
    vitric_gpu::initialize().unwrap();
    Context::builder().label("vitric-test").build().unwrap()
}

fn sampled_storage_image(ctxt: &Context, label: &str) -> Image {
    Image::builder(ctxt)
        .width(EXTENT)
        .height(EXTENT)
        .format(PixelFormat::R8G8B8A8_UNORM)
        .usage(ImageUsage::SAMPLED | ImageUsage::STORAGE)
        .label(label)
        .build()
        .unwrap()
}

fn repeat_shader(repeats: usize) -> Vec<u32> {
    let source = format!(
        r#"
        #version 460 core

        layout(local_size_x_id = 0, local_size_y_id = 1, local_size_z_id = 2) in;
        layout(set = 0, binding = 0) uniform sampler2D src;
        layout(set = 0, binding = 1, rgba8) writeonly uniform image2D dst;
        void main() {{
            ivec2 id = ivec2(gl_GlobalInvocationID.xy);
            vec2 coord = (vec2(id) + 0.5) / vec2(textureSize(src, 0));
            vec4 col = vec4(0.0);
            for (int i = 0; i < {repeats}; ++i) {{
                col += texture(src, coord);
            }}
            imageStore(dst, id, col / float({repeats}));
        }}
        "#
    );
    vitric_shaders::compile_comp(&source, "main").unwrap().comp_spv
}

fn identity_task(ctxt: &Context, spirv: &[u32]) -> Task {
    Task::compute(ctxt)
        .workgroup_size(8, 8, 1)
        .spirv(spirv)
        .entry_name("main")
        .resource(ResourceType::SampledImage)
        .resource(ResourceType::StorageImage)
        .label("identity")
        .build()
        .unwrap()
}

#[test]
#[ignore = "Requires GPU hardware"]
fn compute_identity_copy_roundtrip() {
    let ctxt = test_ctxt();
    let src = sampled_storage_image(&ctxt, "src");
    let dst = sampled_storage_image(&ctxt, "dst");

    let byte_count = (EXTENT * EXTENT * TEXEL_BYTES) as usize;
    let pattern: Vec<u8> = (0..byte_count).map(|i| (i % 251) as u8).collect();

    let upload = Buffer::builder(&ctxt)
        .size(byte_count as u64)
        .staging()
        .host_access(MemoryAccess::WriteOnly)
        .label("upload")
        .build()
        .unwrap();
    upload.write_bytes(&pattern).unwrap();

    let readback = Buffer::builder(&ctxt)
        .size(byte_count as u64)
        .staging()
        .host_access(MemoryAccess::ReadOnly)
        .label("readback")
        .build()
        .unwrap();

    let spirv = repeat_shader(1);
    let task = identity_task(&ctxt, &spirv);
    let pool = vitric_gpu::ResourcePool::new(&task).unwrap();
    pool.bind_image(0, &src.view()).unwrap();
    pool.bind_image(1, &dst.view()).unwrap();

    let mut drain = CommandDrain::new(&ctxt).unwrap();
    drain
        .submit(&[
            Command::SetSubmitType(SubmitType::Compute),
            Command::ImageBarrier {
                img: &src,
                src_usage: ImageUsage::empty(),
                dst_usage: ImageUsage::STAGING,
                src_access: MemoryAccess::None,
                dst_access: MemoryAccess::WriteOnly,
            },
            Command::CopyBufferToImage {
                src: upload.view(),
                dst: src.view(),
            },
            Command::ImageBarrier {
                img: &src,
                src_usage: ImageUsage::STAGING,
                dst_usage: ImageUsage::SAMPLED,
                src_access: MemoryAccess::WriteOnly,
                dst_access: MemoryAccess::ReadOnly,
            },
            Command::ImageBarrier {
                img: &dst,
                src_usage: ImageUsage::empty(),
                dst_usage: ImageUsage::STORAGE,
                src_access: MemoryAccess::None,
                dst_access: MemoryAccess::WriteOnly,
            },
            Command::Dispatch {
                task: &task,
                pool: &pool,
                workgroup_count: [EXTENT / 8, EXTENT / 8, 1],
            },
            Command::ImageBarrier {
                img: &dst,
                src_usage: ImageUsage::STORAGE,
                dst_usage: ImageUsage::STAGING,
                src_access: MemoryAccess::WriteOnly,
                dst_access: MemoryAccess::ReadOnly,
            },
            Command::CopyImageToBuffer {
                src: dst.view(),
                dst: readback.view(),
            },
        ])
        .unwrap();
    drain.wait().unwrap();

    let out = readback.read_bytes(byte_count).unwrap();
    assert_eq!(out, pattern);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn queue_switch_chains_submissions() {
    let ctxt = test_ctxt();

    let a = Buffer::builder(&ctxt)
        .size(256)
        .staging()
        .host_access(MemoryAccess::WriteOnly)
        .label("a")
        .build()
        .unwrap();
    let b = Buffer::builder(&ctxt)
        .size(256)
        .staging()
        .host_access(MemoryAccess::ReadOnly)
        .label("b")
        .build()
        .unwrap();
    a.write_bytes(&[0xA5; 256]).unwrap();

    let mut drain = CommandDrain::new(&ctxt).unwrap();
    drain
        .submit(&[
            Command::SetSubmitType(SubmitType::Compute),
            Command::CopyBuffer {
                src: a.view(),
                dst: b.view(),
            },
            Command::SetSubmitType(SubmitType::Graphics),
            // Inherits the graphics submission instead of opening a new one.
            Command::CopyBuffer {
                src: a.view(),
                dst: b.view(),
            },
        ])
        .unwrap();

    let chain = drain.submission_chain();
    assert_eq!(chain, vec![SubmitType::Compute, SubmitType::Graphics]);
    for pair in chain.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }

    drain.wait().unwrap();
    assert_eq!(b.read_bytes(256).unwrap(), vec![0xA5; 256]);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn staged_write_copy_read_roundtrip() {
    let ctxt = test_ctxt();

    let payload: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
    let upload = Buffer::builder(&ctxt)
        .size(payload.len() as u64)
        .staging()
        .host_access(MemoryAccess::WriteOnly)
        .label("upload")
        .build()
        .unwrap();
    let readback = Buffer::builder(&ctxt)
        .size(payload.len() as u64)
        .staging()
        .host_access(MemoryAccess::ReadOnly)
        .label("readback")
        .build()
        .unwrap();

    upload.write_bytes(&payload).unwrap();

    let mut drain = CommandDrain::new(&ctxt).unwrap();
    drain
        .submit(&[
            Command::SetSubmitType(SubmitType::Compute),
            Command::CopyBuffer {
                src: upload.view(),
                dst: readback.view(),
            },
        ])
        .unwrap();
    drain.wait().unwrap();

    assert_eq!(readback.read_bytes(payload.len()).unwrap(), payload);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn drained_wait_is_idempotent() {
    let ctxt = test_ctxt();

    let a = Buffer::builder(&ctxt)
        .size(64)
        .staging()
        .host_access(MemoryAccess::WriteOnly)
        .label("a")
        .build()
        .unwrap();
    let b = Buffer::builder(&ctxt)
        .size(64)
        .staging()
        .host_access(MemoryAccess::ReadOnly)
        .label("b")
        .build()
        .unwrap();
    a.write_bytes(&[1; 64]).unwrap();

    let mut drain = CommandDrain::new(&ctxt).unwrap();
    // A fresh drain has nothing in flight.
    drain.wait().unwrap();

    drain
        .submit(&[
            Command::SetSubmitType(SubmitType::Compute),
            Command::CopyBuffer {
                src: a.view(),
                dst: b.view(),
            },
        ])
        .unwrap();
    drain.wait().unwrap();
    drain.wait().unwrap();
}

#[test]
#[ignore = "Requires GPU hardware"]
fn reusable_transaction_replays_inline() {
    let ctxt = test_ctxt();

    let a = Buffer::builder(&ctxt)
        .size(128)
        .staging()
        .host_access(MemoryAccess::WriteOnly)
        .label("a")
        .build()
        .unwrap();
    let b = Buffer::builder(&ctxt)
        .size(128)
        .staging()
        .host_access(MemoryAccess::ReadWrite)
        .label("b")
        .build()
        .unwrap();

    let transact = vitric_gpu::Transaction::new(
        "copy-a-to-b",
        &ctxt,
        &[
            Command::SetSubmitType(SubmitType::Compute),
            Command::CopyBuffer {
                src: a.view(),
                dst: b.view(),
            },
        ],
    )
    .unwrap();

    for round in 0..2u8 {
        a.write_bytes(&[round + 1; 128]).unwrap();
        let mut drain = CommandDrain::new(&ctxt).unwrap();
        drain
            .submit(&[Command::InlineTransaction(&transact)])
            .unwrap();
        drain.wait().unwrap();
        assert_eq!(b.read_bytes(128).unwrap(), vec![round + 1; 128]);
    }
}

#[test]
#[ignore = "Requires GPU hardware"]
fn nested_inline_transaction_is_rejected() {
    let ctxt = test_ctxt();

    let a = Buffer::builder(&ctxt)
        .size(64)
        .staging()
        .host_access(MemoryAccess::WriteOnly)
        .label("a")
        .build()
        .unwrap();
    let b = Buffer::builder(&ctxt)
        .size(64)
        .staging()
        .host_access(MemoryAccess::ReadOnly)
        .label("b")
        .build()
        .unwrap();

    let inner = vitric_gpu::Transaction::new(
        "inner",
        &ctxt,
        &[
            Command::SetSubmitType(SubmitType::Compute),
            Command::CopyBuffer {
                src: a.view(),
                dst: b.view(),
            },
        ],
    )
    .unwrap();

    // Precondition violations abort in debug builds and surface as errors in
    // release builds; accept either outcome.
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        vitric_gpu::Transaction::new("outer", &ctxt, &[Command::InlineTransaction(&inner)])
    }));
    match outcome {
        Ok(result) => {
            assert!(matches!(
                result,
                Err(vitric_gpu::GpuError::PreconditionViolated(_))
            ));
        }
        Err(_) => assert!(cfg!(debug_assertions), "panicked in a release build"),
    }
}

#[test]
#[ignore = "Requires GPU hardware"]
fn timestamp_scales_with_workload() {
    let ctxt = test_ctxt();
    let src = sampled_storage_image(&ctxt, "src");
    let dst = sampled_storage_image(&ctxt, "dst");

    {
        let mut drain = CommandDrain::new(&ctxt).unwrap();
        drain
            .submit(&[
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
            ])
            .unwrap();
        drain.wait().unwrap();
    }

    let groups = EXTENT / 8;
    let time_for = |repeats: usize| -> f64 {
        let spirv = repeat_shader(repeats);
        let task = identity_task(&ctxt, &spirv);
        let mut invocation = task
            .compute_invocation()
            .timed()
            .resource(src.view())
            .resource(dst.view())
            .workgroup_count(groups, groups, 1)
            .build()
            .unwrap();
        invocation.submit().unwrap();
        invocation.wait().unwrap();
        invocation.time_us().unwrap()
    };

    let t_10 = time_for(10);
    let t_200 = time_for(200);
    let ratio = t_200 / t_10;
    assert!(
        (10.0..=30.0).contains(&ratio),
        "expected t_200/t_10 in [10, 30], got {ratio} ({t_10}us vs {t_200}us)"
    );
}
