use crate::config::{
    Config, COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGER_NAME, ROLE_ANNOTATION, TOKEN_COMPONENT,
};
use crate::errors::Error;
use crate::models::{
    AdmissionRequest, MutationDecision, PatchOperation, WorkloadIdentity, TOKEN_FIELD,
};
use crate::repositories::SecretStore;
use crate::services::token_issuer::TokenIssuer;
use k8s_openapi::api::core::v1::PodSpec;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Name of the injected volume inside the pod spec.
const TOKEN_VOLUME_NAME: &str = "web-identity-token";

/// Suffix appended to the workload name to form its token Secret's name.
const TOKEN_SECRET_SUFFIX: &str = "-web-identity-token";

/// Decides, once per admission request, whether a pod receives an identity
/// token and how its spec is rewritten.
///
/// The flow is strictly ordered: inspect, derive, issue, persist, patch. A
/// persistence failure aborts before any patch is returned — a returned
/// patch implies the referenced Secret exists.
pub struct MutationController {
    issuer: Arc<TokenIssuer>,
    store: Arc<dyn SecretStore>,
    config: Config,
}

impl MutationController {
    pub fn new(issuer: Arc<TokenIssuer>, store: Arc<dyn SecretStore>, config: Config) -> Self {
        MutationController {
            issuer,
            store,
            config,
        }
    }

    /// Produce the mutation decision for one admission request.
    ///
    /// The inspection fast path (no object, no spec, no role annotation,
    /// or an incomplete identity) returns `NoOp` and never fails; errors
    /// can only arise once the request is eligible.
    #[instrument(skip_all, fields(uid = %request.uid))]
    pub async fn decide(&self, request: &AdmissionRequest) -> Result<MutationDecision, Error> {
        let Some(pod) = &request.object else {
            return Ok(MutationDecision::NoOp);
        };
        let Some(spec) = &pod.spec else {
            return Ok(MutationDecision::NoOp);
        };
        let Some(annotations) = &pod.metadata.annotations else {
            return Ok(MutationDecision::NoOp);
        };
        let Some(iam_role) = annotations.get(ROLE_ANNOTATION) else {
            return Ok(MutationDecision::NoOp);
        };

        let namespace = pod
            .metadata
            .namespace
            .clone()
            .or_else(|| request.namespace.clone())
            .unwrap_or_default();
        let name = annotations
            .get(&self.config.name_annotation())
            .cloned()
            .or_else(|| spec.service_account_name.clone())
            .unwrap_or_default();
        let group = annotations
            .get(&self.config.group_annotation())
            .cloned()
            .unwrap_or_else(|| namespace.clone());

        if namespace.is_empty() || name.is_empty() || group.is_empty() || iam_role.is_empty() {
            debug!("Incomplete workload identity, passing through");
            return Ok(MutationDecision::NoOp);
        }

        let target_indices = target_container_indices(
            spec,
            annotations.get(&self.config.inject_containers_annotation()),
        );

        let identity = WorkloadIdentity {
            namespace,
            name,
            group,
        };
        let token = self.issuer.sign(&identity)?;

        let secret_name = format!("{}{TOKEN_SECRET_SUFFIX}", identity.name);
        self.upsert_token_record(&identity.namespace, &secret_name, token)
            .await?;

        info!(
            namespace = %identity.namespace,
            name = %identity.name,
            secret = %secret_name,
            containers = target_indices.len(),
            "Issued identity token"
        );

        Ok(MutationDecision::Patch(build_patches(
            spec,
            &target_indices,
            &secret_name,
            iam_role,
            &self.config,
        )))
    }

    /// Read-then-create-or-patch. Safe under concurrent duplicate
    /// admissions: losing the create race degrades to a patch, and either
    /// winner's token is semantically equivalent.
    async fn upsert_token_record(
        &self,
        namespace: &str,
        name: &str,
        token: String,
    ) -> Result<(), Error> {
        let fields = BTreeMap::from([(TOKEN_FIELD.to_string(), token)]);
        let labels = BTreeMap::from([
            (COMPONENT_LABEL.to_string(), TOKEN_COMPONENT.to_string()),
            (MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string()),
        ]);

        match self.store.get(namespace, name).await? {
            Some(_) => self.store.patch_fields(namespace, name, &fields).await,
            None => match self.store.create(namespace, name, &fields, &labels).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_conflict() => {
                    self.store.patch_fields(namespace, name, &fields).await
                }
                Err(err) => Err(err),
            },
        }
    }
}

/// Resolve which containers receive the injected environment.
///
/// Names come from the inject-containers annotation (comma-separated,
/// trimmed) and are matched exactly against the spec's container list; a
/// name with no match is silently dropped. Indices are positions in the
/// actual container list. Absent or empty annotation targets container 0.
fn target_container_indices(spec: &PodSpec, annotation: Option<&String>) -> Vec<usize> {
    let wanted: BTreeSet<&str> = annotation
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if wanted.is_empty() {
        return vec![0];
    }

    spec.containers
        .iter()
        .enumerate()
        .filter(|(_, container)| wanted.contains(container.name.as_str()))
        .map(|(index, _)| index)
        .collect()
}

/// Build the ordered patch sequence against the admitted object's existing
/// shape. Append operations require the target list to exist, so each list
/// gets an initializing `add` first when the spec lacks it. No operation
/// references post-patch state.
fn build_patches(
    spec: &PodSpec,
    target_indices: &[usize],
    secret_name: &str,
    iam_role: &str,
    config: &Config,
) -> Vec<PatchOperation> {
    let mut patches = Vec::new();

    if spec.volumes.is_none() {
        patches.push(PatchOperation::add("/spec/volumes", json!([])));
    }
    patches.push(PatchOperation::add(
        "/spec/volumes/-",
        json!({
            "name": TOKEN_VOLUME_NAME,
            "secret": { "secretName": secret_name },
        }),
    ));

    for &index in target_indices {
        let Some(container) = spec.containers.get(index) else {
            continue;
        };

        if container.env.is_none() {
            patches.push(PatchOperation::add(
                format!("/spec/containers/{index}/env"),
                json!([]),
            ));
        }
        patches.push(PatchOperation::add(
            format!("/spec/containers/{index}/env/-"),
            json!({
                "name": "AWS_WEB_IDENTITY_TOKEN_FILE",
                "value": config.token_file_path(),
            }),
        ));
        patches.push(PatchOperation::add(
            format!("/spec/containers/{index}/env/-"),
            json!({
                "name": "AWS_ROLE_ARN",
                "value": iam_role,
            }),
        ));

        if container.volume_mounts.is_none() {
            patches.push(PatchOperation::add(
                format!("/spec/containers/{index}/volumeMounts"),
                json!([]),
            ));
        }
        patches.push(PatchOperation::add(
            format!("/spec/containers/{index}/volumeMounts/-"),
            json!({
                "name": TOKEN_VOLUME_NAME,
                "mountPath": config.token_mount_path(),
            }),
        ));
    }

    patches
}
