use std::path::PathBuf;

/// Which surface ends up on top when the frame is composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerOrder {
    /// CPU surface first, GPU batches drawn over it
    #[default]
    CpuBelow,
    /// GPU batches first; the CPU surface goes over them with its
    /// transparent indices punched out
    GpuBelow,
}

#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// general purpose RAM shared by every process
    pub ram_size: usize,
    /// private region handed to each process
    pub cartridge_size: usize,
    pub init_cartridge: PathBuf,
    pub menu_cartridge: PathBuf,
    /// ticks per second
    pub frame_rate: f64,
    pub layer_order: LayerOrder,
    /// where recordings are written; relative capture paths resolve here
    pub capture_dir: PathBuf,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            ram_size: 32 * 1024,
            cartridge_size: 64 * 1024,
            init_cartridge: PathBuf::from("apps/system/core/init.nib"),
            menu_cartridge: PathBuf::from("apps/system/core/menu.nib"),
            frame_rate: 60.0,
            layer_order: LayerOrder::CpuBelow,
            capture_dir: PathBuf::from("."),
        }
    }
}
