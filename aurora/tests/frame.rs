// End to end frame tests
//
// These drive the whole renderer against a real device and window,
// so they only run when AURORA_GPU_TESTS is set. Everything that
// works without a GPU lives in the unit tests next to the code.

extern crate aurora;
extern crate winit;

use aurora::frontend::MeshTextures;
use aurora::{Aurora, BufferDescription, CameraExtrinsic, MeshBinary, TexturePaths};

use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::event_loop::EventLoopBuilder;
use winit::window::WindowBuilder;

fn gpu_tests_enabled() -> bool {
    std::env::var("AURORA_GPU_TESTS").is_ok()
}

fn init_aurora(width: u32, height: u32) -> Option<(Aurora, winit::window::Window, winit::event_loop::EventLoop<()>)> {
    if !gpu_tests_enabled() {
        return None;
    }
    let event_loop = EventLoopBuilder::new().build();
    let window = WindowBuilder::new()
        .with_inner_size(winit::dpi::PhysicalSize::new(width, height))
        .build(&event_loop)
        .unwrap();

    let aurora = Aurora::new(
        event_loop.raw_display_handle(),
        window.raw_window_handle(),
        width,
        height,
    )
    .unwrap();
    Some((aurora, window, event_loop))
}

/// a unit cube in the packed binary format
fn cube_binary() -> MeshBinary {
    let corners: [[f32; 3]; 8] = [
        [-1.0, -1.0, -1.0],
        [1.0, -1.0, -1.0],
        [1.0, 1.0, -1.0],
        [-1.0, 1.0, -1.0],
        [-1.0, -1.0, 1.0],
        [1.0, -1.0, 1.0],
        [1.0, 1.0, 1.0],
        [-1.0, 1.0, 1.0],
    ];
    let indices: [u16; 36] = [
        0, 1, 2, 2, 3, 0, 4, 6, 5, 6, 4, 7, 0, 3, 7, 7, 4, 0, 1, 5, 6, 6, 2, 1, 3, 2, 6, 6, 7, 3,
        0, 4, 5, 5, 1, 0,
    ];

    let mut vertex_buffer = Vec::new();
    for corner in corners.iter() {
        for component in corner.iter() {
            vertex_buffer.extend_from_slice(&component.to_le_bytes());
        }
        // uv, normal, tangent, bitangent slots
        vertex_buffer.extend_from_slice(&[0u8; 4]);
        vertex_buffer.extend_from_slice(&[0u8; 24]);
    }
    let mut index_buffer = Vec::new();
    for index in indices.iter() {
        index_buffer.extend_from_slice(&index.to_le_bytes());
    }

    MeshBinary {
        index_count: 36,
        vertex_count: 8,
        bounding_box_min: [-1.0, -1.0, -1.0],
        bounding_box_max: [1.0, 1.0, 1.0],
        texture_paths: TexturePaths::default(),
        index_buffer: index_buffer,
        vertex_buffer: vertex_buffer,
    }
}

#[test]
fn empty_frame_presents_and_reports_timings() {
    let (mut aurora, _window, _event_loop) = match init_aurora(800, 600) {
        Some(setup) => setup,
        None => return,
    };

    // no meshes at all, the frame must still go through
    for _ in 0..3 {
        aurora.new_frame();
        aurora.render_frame().unwrap();
    }

    // give the timing cache a chance to refresh
    std::thread::sleep(std::time::Duration::from_millis(250));
    aurora.new_frame();
    aurora.render_frame().unwrap();

    let timings = aurora.render_timings();
    let frame = timings.iter().find(|t| t.name == "Frame");
    let overlay = timings.iter().find(|t| t.name == "ImGui");
    assert!(frame.is_some(), "frame timing entry missing");
    assert!(overlay.is_some(), "overlay timing entry missing");
    assert!(frame.unwrap().time_ms >= 0.0);
    assert!(overlay.unwrap().time_ms >= 0.0);
}

#[test]
fn cube_renders_and_color_buffer_settles() {
    let (mut aurora, _window, _event_loop) = match init_aurora(800, 600) {
        Some(setup) => setup,
        None => return,
    };

    let meshes = aurora
        .create_meshes(&[cube_binary()], &[MeshTextures::default()])
        .unwrap();

    aurora.set_camera_extrinsic(&CameraExtrinsic::default());
    aurora.new_frame();
    aurora.issue_mesh_draws(&meshes);
    aurora.render_frame().unwrap();

    // after the frame the color buffer was last consumed by a
    // sampling pass
    let color = aurora.frontend().last_color_buffer();
    let layout = aurora.frontend().backend().image_layout(color, 0);
    assert!(
        layout == ash::vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            || layout == ash::vk::ImageLayout::PRESENT_SRC_KHR,
        "unexpected color buffer layout {:?}",
        layout
    );
}

#[test]
fn resize_propagates_to_frame_targets_and_pyramid() {
    let (mut aurora, _window, _event_loop) = match init_aurora(800, 600) {
        Some(setup) => setup,
        None => return,
    };

    aurora.set_resolution(1280, 720);
    aurora.new_frame();
    aurora.render_frame().unwrap();
    aurora.new_frame();
    aurora.render_frame().unwrap();

    let backend = aurora.frontend().backend();
    for index in 0..2 {
        let (color, motion, depth) = aurora.frontend().frame_target_images(index);
        assert_eq!(backend.image_extent(color), (1280, 720, 1));
        assert_eq!(backend.image_extent(motion), (1280, 720, 1));
        assert_eq!(backend.image_extent(depth), (1280, 720, 1));
    }
    let pyramid = aurora.frontend().depth_pyramid_image();
    assert_eq!(backend.image_extent(pyramid), (640, 360, 1));
}

#[test]
fn shader_hot_reload_swaps_the_pipeline() {
    let (mut aurora, _window, _event_loop) = match init_aurora(320, 240) {
        Some(setup) => setup,
        None => return,
    };

    // a throwaway compute shader the test can touch
    let shader_path = aurora::shader::shader_directory().join("hotReloadProbe.comp");
    let source = "#version 460\n\
        layout(local_size_x = 1) in;\n\
        layout(set = 1, binding = 0) buffer Out { uint value; };\n\
        void main() { value = 1; }\n";
    std::fs::write(&shader_path, source).unwrap();

    let pass = aurora
        .frontend_mut()
        .backend_mut()
        .create_compute_pass(&aurora::ComputePassDescription {
            name: String::from("Hot Reload Probe"),
            shader_description: aurora::ShaderDescription::new("hotReloadProbe.comp"),
        })
        .unwrap();
    let pipeline_before = aurora.frontend().backend().pass_pipeline(pass);

    // mtime resolution is a full second on some filesystems
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let touched = String::from(source) + "// touched\n";
    std::fs::write(&shader_path, touched).unwrap();

    aurora.frontend_mut().backend_mut().update_shader_code();
    let pipeline_after = aurora.frontend().backend().pass_pipeline(pass);
    assert_ne!(pipeline_before, pipeline_after);

    let _ = std::fs::remove_file(&shader_path);
}

#[test]
fn staging_buffer_wraps_large_uploads() {
    let (mut aurora, _window, _event_loop) = match init_aurora(320, 240) {
        Some(setup) => setup,
        None => return,
    };

    let backend = aurora.frontend_mut().backend_mut();
    let buffer = backend
        .create_storage_buffer(&BufferDescription {
            size: 4 * 1024 * 1024,
            initial_data: Vec::new(),
        })
        .unwrap();

    // 4 MiB through the 1 MiB staging buffer takes four submissions
    let data = vec![0xA5u8; 4 * 1024 * 1024];
    let submissions = backend.fill_storage_buffer(buffer, &data);
    assert_eq!(submissions, 4);
}
