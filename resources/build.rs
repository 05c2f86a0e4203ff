fn main() {
    use build_script_cfg::Cfg;
    use search_cuda_tools::find_cuda_root;

    let cpu = Cfg::new("use_cpu");
    let reference = Cfg::new("use_ref");
    let cuda = Cfg::new("use_cuda");
    let cl = Cfg::new("use_cl");
    if cfg!(feature = "common-cpu") {
        cpu.define();
    }
    if cfg!(feature = "reference") {
        reference.define();
    }
    if cfg!(feature = "nvidia-gpu") && find_cuda_root().is_some() {
        cuda.define();
    }
    if cfg!(feature = "opencl") {
        cl.define();
    }
}
