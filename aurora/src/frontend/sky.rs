// Sky and image based lighting preparation
//
// Runs once on the first frame: the equirectangular HDR environment
// is copied into a cubemap, the cube mip chain is built, diffuse
// and specular probes are convolved and the BRDF lookup table is
// integrated. The LUT is re-issued whenever its diffuse BRDF
// specialisation constant changes.

use crate::backend::RenderBackend;
use crate::desc::*;
use crate::Result;

use std::path::PathBuf;

pub const SKY_TEXTURE_RESOLUTION: u32 = 1024;
pub const SKY_TEXTURE_MIP_COUNT: u32 = 8;
pub const DIFFUSE_PROBE_RESOLUTION: u32 = 256;
pub const SPECULAR_PROBE_RESOLUTION: u32 = 512;
pub const BRDF_LUT_RESOLUTION: u32 = 512;

/// the smallest specular mips alias too strongly, skip them
pub const SPECULAR_PROBE_MIPS_TOO_SMALL: u32 = 4;

const SPEC_DIFFUSE_BRDF: u32 = 0;
const SPEC_MIP_LEVEL: u32 = 0;
const SPEC_MIP_COUNT: u32 = 1;

pub struct Sky {
    to_cubemap_pass: PassHandle,
    cubemap_mip_passes: Vec<PassHandle>,
    diffuse_convolution_pass: PassHandle,
    specular_convolution_passes: Vec<PassHandle>,
    brdf_lut_pass: PassHandle,
    sky_draw_pass: PassHandle,

    pub sky_texture: ImageHandle,
    pub diffuse_probe: ImageHandle,
    pub specular_probe: ImageHandle,
    pub brdf_lut: ImageHandle,
    environment_map: ImageHandle,

    specular_probe_mip_count: u32,
    diffuse_brdf_constant: i32,
}

impl Sky {
    fn brdf_lut_shader_description(diffuse_brdf: i32) -> ShaderDescription {
        let mut desc = ShaderDescription::new(PathBuf::from("brdfLut.comp"));
        desc.specialisation_constants.push(SPEC_DIFFUSE_BRDF, diffuse_brdf);
        desc
    }

    pub fn new(
        backend: &mut RenderBackend,
        environment_map: ImageHandle,
        color_buffer: ImageHandle,
        depth_buffer: ImageHandle,
        diffuse_brdf: i32,
    ) -> Result<Self> {
        let sky_texture = backend.create_image(&ImageDescription {
            width: SKY_TEXTURE_RESOLUTION,
            height: SKY_TEXTURE_RESOLUTION,
            image_type: ImageType::TypeCube,
            format: ImageFormat::R11G11B10Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            mip_count: MipCount::Manual(SKY_TEXTURE_MIP_COUNT),
            ..Default::default()
        })?;
        let diffuse_probe = backend.create_image(&ImageDescription {
            width: DIFFUSE_PROBE_RESOLUTION,
            height: DIFFUSE_PROBE_RESOLUTION,
            image_type: ImageType::TypeCube,
            format: ImageFormat::R11G11B10Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ..Default::default()
        })?;
        let specular_probe_mip_count =
            crate::math::mip_count_from_resolution(SPECULAR_PROBE_RESOLUTION, SPECULAR_PROBE_RESOLUTION, 1)
                - SPECULAR_PROBE_MIPS_TOO_SMALL;
        let specular_probe = backend.create_image(&ImageDescription {
            width: SPECULAR_PROBE_RESOLUTION,
            height: SPECULAR_PROBE_RESOLUTION,
            image_type: ImageType::TypeCube,
            format: ImageFormat::R11G11B10Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            mip_count: MipCount::Manual(specular_probe_mip_count),
            ..Default::default()
        })?;
        let brdf_lut = backend.create_image(&ImageDescription {
            width: BRDF_LUT_RESOLUTION,
            height: BRDF_LUT_RESOLUTION,
            format: ImageFormat::RGBA16Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ..Default::default()
        })?;

        let to_cubemap_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Sky To Cubemap"),
            shader_description: ShaderDescription::new(PathBuf::from("skyToCubemap.comp")),
        })?;

        let mut cubemap_mip_passes = Vec::new();
        for mip in 1..SKY_TEXTURE_MIP_COUNT {
            let mut shader = ShaderDescription::new(PathBuf::from("cubemapMip.comp"));
            shader.specialisation_constants.push(SPEC_MIP_LEVEL, mip as i32);
            cubemap_mip_passes.push(backend.create_compute_pass(&ComputePassDescription {
                name: format!("Sky Mip {}", mip),
                shader_description: shader,
            })?);
        }

        let diffuse_convolution_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Diffuse Convolution"),
            shader_description: ShaderDescription::new(PathBuf::from("diffuseConvolution.comp")),
        })?;

        let mut specular_convolution_passes = Vec::new();
        for mip in 0..specular_probe_mip_count {
            let mut shader = ShaderDescription::new(PathBuf::from("specularConvolution.comp"));
            shader.specialisation_constants.push(SPEC_MIP_LEVEL, mip as i32);
            shader
                .specialisation_constants
                .push(SPEC_MIP_COUNT, specular_probe_mip_count as i32);
            specular_convolution_passes.push(backend.create_compute_pass(&ComputePassDescription {
                name: format!("Specular Convolution {}", mip),
                shader_description: shader,
            })?);
        }

        let brdf_lut_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("BRDF Lut"),
            shader_description: Self::brdf_lut_shader_description(diffuse_brdf),
        })?;

        // the skybox renders after the opaque geometry, only where
        // nothing was drawn
        let sky_draw_pass = backend.create_graphic_pass(&GraphicPassDescription {
            name: String::from("Sky"),
            shader_descriptions: GraphicPassShaderDescriptions::new(
                ShaderDescription::new(PathBuf::from("sky.vert")),
                ShaderDescription::new(PathBuf::from("sky.frag")),
            ),
            attachments: vec![
                Attachment::new(color_buffer, 0, AttachmentLoadOp::Load),
                Attachment::new(depth_buffer, 0, AttachmentLoadOp::Load),
            ],
            patch_control_points: 0,
            rasterization: RasterizationConfig::default(),
            blending: BlendState::None,
            depth_test: DepthTest {
                function: DepthFunction::LessEqual,
                write: false,
            },
        })?;

        Ok(Self {
            to_cubemap_pass: to_cubemap_pass,
            cubemap_mip_passes: cubemap_mip_passes,
            diffuse_convolution_pass: diffuse_convolution_pass,
            specular_convolution_passes: specular_convolution_passes,
            brdf_lut_pass: brdf_lut_pass,
            sky_draw_pass: sky_draw_pass,
            sky_texture: sky_texture,
            diffuse_probe: diffuse_probe,
            specular_probe: specular_probe,
            brdf_lut: brdf_lut,
            environment_map: environment_map,
            specular_probe_mip_count: specular_probe_mip_count,
            diffuse_brdf_constant: diffuse_brdf,
        })
    }

    pub fn specular_probe_mip_count(&self) -> u32 {
        self.specular_probe_mip_count
    }

    pub fn set_environment_map(&mut self, image: ImageHandle) {
        self.environment_map = image;
    }

    pub fn sky_draw_pass(&self) -> PassHandle {
        self.sky_draw_pass
    }

    /// Re-specialise and re-issue the LUT when the shading config
    /// changed its diffuse BRDF.
    pub fn update_diffuse_brdf(
        &mut self,
        backend: &mut RenderBackend,
        diffuse_brdf: i32,
        cube_sampler: SamplerHandle,
    ) -> Result<()> {
        if diffuse_brdf == self.diffuse_brdf_constant {
            return Ok(());
        }
        self.diffuse_brdf_constant = diffuse_brdf;
        backend.update_compute_pass_shader_description(
            self.brdf_lut_pass,
            Self::brdf_lut_shader_description(diffuse_brdf),
        )?;
        self.issue_brdf_lut_execution(backend, cube_sampler, &[]);
        Ok(())
    }

    fn issue_brdf_lut_execution(
        &self,
        backend: &mut RenderBackend,
        _cube_sampler: SamplerHandle,
        parents: &[PassHandle],
    ) {
        let mut execution = PassExecution::new(self.brdf_lut_pass);
        execution.resources.storage_images = vec![ImageResource::new(self.brdf_lut, 0, 0)];
        execution.parents = parents.to_vec();
        let groups = (BRDF_LUT_RESOLUTION + 7) / 8;
        execution.dispatch_count = [groups, groups, 1];
        backend.set_pass_execution(execution);
    }

    /// The one-time environment preparation, issued as parents of
    /// the first frame's main pass. Returns the passes the forward
    /// pass must wait for.
    pub fn issue_first_frame_preparation(
        &self,
        backend: &mut RenderBackend,
        hdri_sampler: SamplerHandle,
        cube_sampler: SamplerHandle,
    ) -> Vec<PassHandle> {
        // equirectangular to cube
        let mut to_cube = PassExecution::new(self.to_cubemap_pass);
        to_cube.resources.sampled_images = vec![ImageResource::new(self.environment_map, 0, 1)];
        to_cube.resources.storage_images = vec![ImageResource::new(self.sky_texture, 0, 0)];
        to_cube.resources.samplers = vec![SamplerResource::new(hdri_sampler, 2)];
        let groups = (SKY_TEXTURE_RESOLUTION + 7) / 8;
        to_cube.dispatch_count = [groups, groups, 6];
        backend.set_pass_execution(to_cube);

        // cube mip chain, one pass per level
        let mut last_pass = self.to_cubemap_pass;
        for (index, &pass) in self.cubemap_mip_passes.iter().enumerate() {
            let mip = index as u32 + 1;
            let mut execution = PassExecution::new(pass);
            execution.resources.storage_images = vec![
                ImageResource::new(self.sky_texture, mip - 1, 0),
                ImageResource::new(self.sky_texture, mip, 1),
            ];
            execution.parents = vec![last_pass];
            let size = (SKY_TEXTURE_RESOLUTION >> mip).max(1);
            execution.dispatch_count = [(size + 7) / 8, (size + 7) / 8, 6];
            backend.set_pass_execution(execution);
            last_pass = pass;
        }

        // diffuse convolution over the whole chain
        let mut diffuse = PassExecution::new(self.diffuse_convolution_pass);
        diffuse.resources.sampled_images = vec![ImageResource::new(self.sky_texture, 0, 1)];
        diffuse.resources.storage_images = vec![ImageResource::new(self.diffuse_probe, 0, 0)];
        diffuse.resources.samplers = vec![SamplerResource::new(cube_sampler, 2)];
        diffuse.parents = vec![last_pass];
        let groups = (DIFFUSE_PROBE_RESOLUTION + 7) / 8;
        diffuse.dispatch_count = [groups, groups, 6];
        backend.set_pass_execution(diffuse);

        // specular convolution per roughness mip
        let mut specular_parents = Vec::new();
        for (mip, &pass) in self.specular_convolution_passes.iter().enumerate() {
            let mut execution = PassExecution::new(pass);
            execution.resources.sampled_images = vec![ImageResource::new(self.sky_texture, 0, 1)];
            execution.resources.storage_images =
                vec![ImageResource::new(self.specular_probe, mip as u32, 0)];
            execution.resources.samplers = vec![SamplerResource::new(cube_sampler, 2)];
            execution.parents = vec![last_pass];
            let size = (SPECULAR_PROBE_RESOLUTION >> mip).max(1);
            execution.dispatch_count = [(size + 7) / 8, (size + 7) / 8, 6];
            backend.set_pass_execution(execution);
            specular_parents.push(pass);
        }

        self.issue_brdf_lut_execution(backend, cube_sampler, &[]);

        let mut parents = vec![self.diffuse_convolution_pass, self.brdf_lut_pass];
        parents.extend(specular_parents);
        parents
    }

    /// Per frame skybox draw over the lit color buffer
    pub fn issue_sky_draw(
        &self,
        backend: &mut RenderBackend,
        framebuffer: FramebufferHandle,
        sky_sampler: SamplerHandle,
        light_buffer: StorageBufferHandle,
        parents: &[PassHandle],
    ) -> PassHandle {
        let mut execution = PassExecution::new(self.sky_draw_pass);
        execution.resources.sampled_images = vec![ImageResource::new(self.sky_texture, 0, 0)];
        execution.resources.samplers = vec![SamplerResource::new(sky_sampler, 1)];
        execution.resources.storage_buffers =
            vec![StorageBufferResource::new(light_buffer, true, 2)];
        execution.parents = parents.to_vec();
        execution.framebuffer = Some(framebuffer);
        backend.set_pass_execution(execution);
        self.sky_draw_pass
    }
}
