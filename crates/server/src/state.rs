use crate::kernel_actor::KernelHandle;

#[derive(Clone)]
pub struct AppState {
    pub kernel: KernelHandle,
}
