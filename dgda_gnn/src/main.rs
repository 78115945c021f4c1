use anyhow::{Context, Result};
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, Wgpu};
use clap::Parser;
use dgda_gnn::benchmark;
use dgda_gnn::cli::{BenchmarkArgs, DeviceSpec};
use tracing_subscriber::EnvFilter;

type MyBackend = Wgpu<f32, i32>;
type MyAutodiffBackend = Autodiff<MyBackend>;

fn wgpu_device(device: DeviceSpec) -> WgpuDevice {
    match device {
        DeviceSpec::Default => WgpuDevice::default(),
        DeviceSpec::Cpu => WgpuDevice::Cpu,
        DeviceSpec::Discrete(index) => WgpuDevice::DiscreteGpu(index),
        DeviceSpec::Integrated(index) => WgpuDevice::IntegratedGpu(index),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dgda_gnn=info".parse()?))
        .init();

    let args = BenchmarkArgs::parse();
    let device = wgpu_device(args.device);

    let result = benchmark::run::<MyAutodiffBackend>(&args, device).with_context(|| {
        format!(
            "benchmark {} -> {} failed",
            args.source, args.target
        )
    })?;

    println!("{}", result.to_line());
    Ok(())
}
