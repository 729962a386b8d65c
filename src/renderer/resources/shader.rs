use std::path::Path;
use ash::vk;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

const SHADERS_DIR: &str = "shaders-built";

/// A compiled compute kernel. The renderer treats the SPIR-V blob as
/// opaque; it only binds the module into a pipeline.
pub struct ComputeShader {
    pub comp_mod: vk::ShaderModule,
}

impl ComputeShader {
    pub fn new(shader_name: &str, device: &ash::Device) -> Result<Self> {
        let comp_mod = create_shader_module(
            (&format!("{}/{}.comp.spv", SHADERS_DIR, shader_name)).as_ref(),
            device,
        )?;
        Ok(Self { comp_mod })
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.comp_mod != vk::ShaderModule::null() {
                device.destroy_shader_module(self.comp_mod, None);
                self.comp_mod = vk::ShaderModule::null();
            }
        }
    }
}

fn create_shader_module(filepath: &Path, device: &ash::Device) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(filepath)
        .wrap_err_with(|| format!("failed to read shader binary {:?}", filepath))?;

    // Re-pack into u32 words; the file on disk has no alignment guarantee.
    let code = bytemuck::pod_collect_to_vec::<u8, u32>(&bytes);

    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(&code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)
            .wrap_err_with(|| format!("failed to create shader module from {:?}", filepath))?
    };

    Ok(shader_module)
}
