//! Render passes: one subpass, one color attachment.

use crate::context::Context;
use crate::error::{GpuError, Result};
use crate::image::Image;
use ash::vk;

/// A single-subpass color pass and its framebuffer, bound to one attachment
/// image. The attachment is borrowed, not owned; the caller transitions it
/// into and out of `COLOR_ATTACHMENT_OPTIMAL` with image barriers.
pub struct RenderPass<'a> {
    ctxt: Context,
    attachment: &'a Image,
    pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    viewport: vk::Rect2D,
    clear_value: vk::ClearValue,
}

impl<'a> RenderPass<'a> {
    /// Start building a render pass over `attachment`.
    pub fn builder(ctxt: &Context, attachment: &'a Image) -> RenderPassBuilder<'a> {
        RenderPassBuilder {
            ctxt: ctxt.clone(),
            attachment,
            clear_color: [0.0; 4],
        }
    }

    pub fn attachment(&self) -> &'a Image {
        self.attachment
    }

    pub(crate) fn ctxt(&self) -> &Context {
        &self.ctxt
    }

    pub(crate) fn handle(&self) -> vk::RenderPass {
        self.pass
    }

    pub(crate) fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub(crate) fn viewport(&self) -> vk::Rect2D {
        self.viewport
    }

    pub(crate) fn clear_value(&self) -> vk::ClearValue {
        self.clear_value
    }
}

impl Drop for RenderPass<'_> {
    fn drop(&mut self) {
        unsafe {
            self.ctxt.device().destroy_framebuffer(self.framebuffer, None);
            self.ctxt.device().destroy_render_pass(self.pass, None);
        }
        tracing::debug!("destroyed render pass");
    }
}

/// Builder for [`RenderPass`].
pub struct RenderPassBuilder<'a> {
    ctxt: Context,
    attachment: &'a Image,
    clear_color: [f32; 4],
}

impl<'a> RenderPassBuilder<'a> {
    /// Clear color applied by the pass's load op.
    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn build(self) -> Result<RenderPass<'a>> {
        let ctxt = self.ctxt;
        let attm_cfg = self.attachment.config();
        if self.attachment.is_staging() {
            return Err(GpuError::precondition(format!(
                "staging image '{}' cannot be a render-pass attachment",
                attm_cfg.label
            )));
        }

        let attachment_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let attachments = [vk::AttachmentDescription::default()
            .format(attm_cfg.format.to_vk()?)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&attachment_refs)];
        let pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let pass = unsafe { ctxt.device().create_render_pass(&pass_info, None)? };

        let view = match self.attachment.view_handle() {
            Ok(view) => view,
            Err(e) => {
                unsafe { ctxt.device().destroy_render_pass(pass, None) };
                return Err(e);
            }
        };
        let views = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(pass)
            .attachments(&views)
            .width(attm_cfg.width)
            .height(attm_cfg.height)
            .layers(1);
        let framebuffer =
            match unsafe { ctxt.device().create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    unsafe { ctxt.device().destroy_render_pass(pass, None) };
                    return Err(e.into());
                }
            };

        let viewport = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: attm_cfg.width,
                height: attm_cfg.height,
            },
        };

        tracing::debug!("created render pass");
        Ok(RenderPass {
            ctxt,
            attachment: self.attachment,
            pass,
            framebuffer,
            viewport,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
        })
    }
}
