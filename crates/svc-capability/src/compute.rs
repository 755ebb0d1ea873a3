//! The Compute capability surface (spec.md §4.2).
//!
//! `Execute` runs a registered program under the manifest's resource
//! limits. There is no general-purpose script interpreter here — plug-in
//! services register a native closure under a program id at construction
//! time, and the sandbox's job is purely to gate access and enforce the
//! compute deadline, not to interpret untrusted bytecode itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use svc_core::{Capability, Manifest, ServiceError};

use crate::secrets::Secrets;

pub type ComputeFn = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, ServiceError> + Send + Sync>;

#[derive(Clone)]
pub struct ComputeRequest {
    pub program: String,
    pub input: Vec<u8>,
}

pub struct Compute {
    manifest: Arc<Manifest>,
    programs: HashMap<String, ComputeFn>,
}

impl Compute {
    pub fn new(manifest: Arc<Manifest>) -> Self {
        Self {
            manifest,
            programs: HashMap::new(),
        }
    }

    pub fn register(&mut self, program: impl Into<String>, f: ComputeFn) {
        self.programs.insert(program.into(), f);
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.manifest.grants(Capability::Compute) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Compute"))
        }
    }

    fn lookup(&self, program: &str) -> Result<ComputeFn, ServiceError> {
        self.programs
            .get(program)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("compute program '{program}'")))
    }

    pub async fn execute(&self, request: ComputeRequest) -> Result<Vec<u8>, ServiceError> {
        self.check()?;
        let f = self.lookup(&request.program)?;
        let budget = Duration::from_millis(self.manifest.resource_limits.max_compute_ms);
        let input = request.input;
        tokio::time::timeout(budget, async move { f(&input) })
            .await
            .map_err(|_| ServiceError::DeadlineExceeded)?
    }

    /// Same contract as [`Compute::execute`], with decrypted secrets made
    /// available to the program via a side-channel the caller supplies —
    /// the program never receives raw ciphertext nor a handle to the
    /// secret store itself.
    pub async fn execute_with_secrets(
        &self,
        request: ComputeRequest,
        secrets: &Secrets,
        names: &[&str],
    ) -> Result<Vec<u8>, ServiceError> {
        self.check()?;
        let f = self.lookup(&request.program)?;
        let budget = Duration::from_millis(self.manifest.resource_limits.max_compute_ms);
        let input = request.input;
        let result = secrets
            .use_multiple(names, move |plaintexts| {
                let mut buf = input;
                for v in plaintexts.values() {
                    buf.extend_from_slice(v);
                }
                buf
            })
            .await?;
        tokio::time::timeout(budget, async move { f(&result) })
            .await
            .map_err(|_| ServiceError::DeadlineExceeded)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_core::ResourceLimits;

    fn manifest(caps: Vec<Capability>, max_compute_ms: u64) -> Arc<Manifest> {
        Arc::new(Manifest {
            service_id: "oracle".into(),
            required_capabilities: caps,
            requested_capabilities: vec![],
            resource_limits: ResourceLimits {
                max_compute_ms,
                ..ResourceLimits::default()
            },
            sealed_config_key: "oracle/config".into(),
        })
    }

    #[tokio::test]
    async fn executes_registered_program() {
        let mut compute = Compute::new(manifest(vec![Capability::Compute], 1_000));
        compute.register(
            "double",
            Arc::new(|input: &[u8]| Ok(input.iter().map(|b| b.wrapping_mul(2)).collect())),
        );
        let out = compute
            .execute(ComputeRequest {
                program: "double".into(),
                input: vec![1, 2, 3],
            })
            .await
            .unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn exceeding_deadline_fails_with_deadline_exceeded() {
        let mut compute = Compute::new(manifest(vec![Capability::Compute], 10));
        compute.register(
            "slow",
            Arc::new(|_| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(vec![])
            }),
        );
        let err = compute
            .execute(ComputeRequest {
                program: "slow".into(),
                input: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), svc_core::ErrorKind::DeadlineExceeded);
    }
}
