//! Builds the `vm.create` configuration document from a machine definition.
//!
//! Each section is filled in by its own step, in a fixed order. Only the
//! kernel is mandatory; every other section is left out when the definition
//! has nothing to say about it. The first failing step aborts the build.

use crate::{
    domain::MachineDef,
    error::ConfigError,
    net::build_net,
    vm::models::{
        CmdlineConfig, CpusConfig, DiskConfig, InitramfsConfig, KernelConfig, MemoryConfig,
        NetConfig, VmConfig,
    },
};

pub fn build_vm_config(def: &MachineDef) -> Result<VmConfig, ConfigError> {
    let cpus = build_cpus(def);
    let memory = build_memory(def)?;
    let kernel = build_kernel(def)?;
    let cmdline = build_cmdline(def);
    let initramfs = build_initramfs(def);
    let disks = build_disks(def);
    let net = build_nets(def)?;

    Ok(VmConfig {
        cpus,
        memory,
        kernel,
        cmdline,
        initramfs,
        disks,
        net,
    })
}

/// Serialized form of [`build_vm_config`], as sent over the wire.
pub fn build_vm_json(def: &MachineDef) -> Result<String, crate::error::Error> {
    let config = build_vm_config(def)?;
    serde_json::to_string(&config)
        .map_err(|e| crate::error::TransportError::Encode(e).into())
}

fn build_cpus(def: &MachineDef) -> Option<CpusConfig> {
    let max_count = def.max_vcpus();
    let boot_count = def.online_vcpus();

    (max_count != 0 || boot_count != 0).then_some(CpusConfig {
        boot_count,
        max_count,
    })
}

fn build_memory(def: &MachineDef) -> Result<Option<MemoryConfig>, ConfigError> {
    let size_bytes = def
        .memory_kib
        .checked_mul(1024)
        .ok_or(ConfigError::MemoryTooLarge(def.memory_kib))?;
    Ok((size_bytes != 0).then_some(MemoryConfig { size_bytes }))
}

fn build_kernel(def: &MachineDef) -> Result<KernelConfig, ConfigError> {
    let path = def.os.kernel.clone().ok_or(ConfigError::MissingKernel)?;
    Ok(KernelConfig { path })
}

fn build_cmdline(def: &MachineDef) -> Option<CmdlineConfig> {
    def.os
        .cmdline
        .as_deref()
        .filter(|args| !args.is_empty())
        .map(|args| CmdlineConfig { args: args.into() })
}

fn build_initramfs(def: &MachineDef) -> Option<InitramfsConfig> {
    def.os
        .initrd
        .clone()
        .map(|path| InitramfsConfig { path })
}

fn build_disks(def: &MachineDef) -> Option<Vec<DiskConfig>> {
    let disks: Vec<_> = def
        .disks
        .iter()
        .filter_map(|disk| {
            disk.path.clone().map(|path| DiskConfig {
                path,
                readonly: disk.readonly,
            })
        })
        .collect();

    (!disks.is_empty()).then_some(disks)
}

fn build_nets(def: &MachineDef) -> Result<Option<Vec<NetConfig>>, ConfigError> {
    if def.nets.is_empty() {
        return Ok(None);
    }

    let nets = def.nets.iter().map(build_net).collect::<Result<Vec<_>, _>>()?;
    Ok(Some(nets))
}
