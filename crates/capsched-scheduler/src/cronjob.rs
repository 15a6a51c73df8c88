//! Trigger wiring manifests
//!
//! Generates the Kubernetes objects that fire the scheduler: one CronJob per
//! schedule running the same image with `run --schedule <up|down>`, the
//! config as a ConfigMap, and just enough RBAC to read and patch the one
//! MachineDeployment and record events on it.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{
    CronJob, CronJobSpec, JobSpec, JobTemplateSpec, PodFailurePolicy,
    PodFailurePolicyOnExitCodesRequirement, PodFailurePolicyRule,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, ObjectFieldSelector,
    PodSecurityContext, PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext,
    ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;

use capsched_capi::CAPI_GROUP;
use capsched_common::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CAPSCHED};

use crate::config::{SchedulerConfig, MAX_CALL_TIMEOUT_SECONDS};
use crate::profile::Schedule;

/// Exit code for outcomes that must not be retried
pub const EXIT_PERMANENT_FAILURE: i32 = 2;
/// Exit code asking the Job controller to retry (EX_TEMPFAIL)
pub const EXIT_TRANSIENT_FAILURE: i32 = 75;

/// Container name inside the job pod
const CONTAINER_NAME: &str = "capsched";
/// Where the ConfigMap is mounted
const CONFIG_MOUNT_PATH: &str = "/etc/capsched";
/// Key of the config file inside the ConfigMap
const CONFIG_KEY: &str = "config.yaml";
/// Label carrying the schedule a job belongs to
const LABEL_SCHEDULE: &str = "capsched.io/schedule";

/// A fire missed by more than this is dropped rather than run late
const STARTING_DEADLINE_SECONDS: i64 = 300;
/// Job retries for transient failures
const BACKOFF_LIMIT: i32 = 3;
/// Finished jobs are garbage collected after a day
const TTL_SECONDS_AFTER_FINISHED: i32 = 86_400;
/// First delay the Job controller waits before recreating a failed pod
const INITIAL_BACKOFF_SECONDS: i64 = 10;
/// Allowance for pod start, client setup and discovery on top of the call budget
const STARTUP_ALLOWANCE_SECONDS: i64 = 30;
/// Read, update and result emission each get one call timeout
const CALLS_PER_INVOCATION: i64 = 3;

/// Where and how the trigger runs
#[derive(Clone, Debug)]
pub struct TriggerOptions {
    /// Base name for every generated object
    pub name: String,
    /// Namespace the CronJobs run in
    pub namespace: String,
    /// Container image holding the `capsched` binary
    pub image: String,
    /// Raw config file, stored verbatim in the ConfigMap
    pub config_yaml: String,
}

impl TriggerOptions {
    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "capsched".to_string()),
            ("app.kubernetes.io/instance".to_string(), self.name.clone()),
            (
                LABEL_MANAGED_BY.to_string(),
                LABEL_MANAGED_BY_CAPSCHED.to_string(),
            ),
        ])
    }

    fn meta(&self, name: String, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }
}

/// Upper bound on one invocation's wall time, enforced on the pod
pub fn invocation_deadline_seconds(config: &SchedulerConfig) -> i64 {
    let call_timeout = config.call_timeout_seconds.min(MAX_CALL_TIMEOUT_SECONDS) as i64;
    CALLS_PER_INVOCATION * call_timeout + STARTUP_ALLOWANCE_SECONDS
}

/// Upper bound on the whole Job: every attempt allowed by the backoff limit
/// at its full invocation deadline, plus the controller's doubling backoff
/// delays between attempts.
pub fn job_deadline_seconds(config: &SchedulerConfig) -> i64 {
    let attempts = i64::from(BACKOFF_LIMIT) + 1;
    let backoff: i64 = (0..BACKOFF_LIMIT)
        .map(|retry| INITIAL_BACKOFF_SECONDS << retry)
        .sum();
    attempts * invocation_deadline_seconds(config) + backoff
}

fn service_account(opts: &TriggerOptions) -> ServiceAccount {
    ServiceAccount {
        metadata: opts.meta(opts.name.clone(), &opts.namespace),
        ..Default::default()
    }
}

fn config_map(opts: &TriggerOptions) -> ConfigMap {
    ConfigMap {
        metadata: opts.meta(format!("{}-config", opts.name), &opts.namespace),
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            opts.config_yaml.clone(),
        )])),
        ..Default::default()
    }
}

/// Access to the single managed MachineDeployment, in the pool's namespace
fn role(opts: &TriggerOptions, pool_namespace: &str, pool_name: &str) -> Role {
    Role {
        metadata: opts.meta(opts.name.clone(), pool_namespace),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![CAPI_GROUP.to_string()]),
                resources: Some(vec!["machinedeployments".to_string()]),
                resource_names: Some(vec![pool_name.to_string()]),
                verbs: vec!["get".to_string(), "patch".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new(), "events.k8s.io".to_string()]),
                resources: Some(vec!["events".to_string()]),
                verbs: vec!["create".to_string(), "patch".to_string()],
                ..Default::default()
            },
        ]),
    }
}

fn role_binding(opts: &TriggerOptions, pool_namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: opts.meta(opts.name.clone(), pool_namespace),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: opts.name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: opts.name.clone(),
            namespace: Some(opts.namespace.clone()),
            ..Default::default()
        }]),
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container(opts: &TriggerOptions, schedule: Schedule, cronjob_name: &str) -> Container {
    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(opts.image.clone()),
        args: Some(vec![
            "run".to_string(),
            "--schedule".to_string(),
            schedule.to_string(),
            "--config".to_string(),
            format!("{}/{}", CONFIG_MOUNT_PATH, CONFIG_KEY),
        ]),
        env: Some(vec![
            field_env("POD_NAME", "metadata.name"),
            field_env("POD_NAMESPACE", "metadata.namespace"),
            field_env("NODE_NAME", "spec.nodeName"),
            EnvVar {
                name: "CRONJOB_NAME".to_string(),
                value: Some(cronjob_name.to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "config".to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("10m".to_string())),
                ("memory".to_string(), Quantity("32Mi".to_string())),
            ])),
            limits: Some(BTreeMap::from([(
                "memory".to_string(),
                Quantity("128Mi".to_string()),
            )])),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn cron_job(opts: &TriggerOptions, config: &SchedulerConfig, schedule: Schedule) -> CronJob {
    let name = format!("{}-{}", opts.name, schedule);
    let mut labels = opts.labels();
    labels.insert(LABEL_SCHEDULE.to_string(), schedule.to_string());

    let pod_spec = PodSpec {
        service_account_name: Some(opts.name.clone()),
        restart_policy: Some("Never".to_string()),
        security_context: Some(PodSecurityContext {
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        active_deadline_seconds: Some(invocation_deadline_seconds(config)),
        containers: vec![container(opts, schedule, &name)],
        volumes: Some(vec![Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: format!("{}-config", opts.name),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let job_spec = JobSpec {
        backoff_limit: Some(BACKOFF_LIMIT),
        active_deadline_seconds: Some(job_deadline_seconds(config)),
        ttl_seconds_after_finished: Some(TTL_SECONDS_AFTER_FINISHED),
        // Permanent failures would fail identically on every retry
        pod_failure_policy: Some(PodFailurePolicy {
            rules: vec![PodFailurePolicyRule {
                action: "FailJob".to_string(),
                on_exit_codes: Some(PodFailurePolicyOnExitCodesRequirement {
                    container_name: Some(CONTAINER_NAME.to_string()),
                    operator: "In".to_string(),
                    values: vec![EXIT_PERMANENT_FAILURE],
                }),
                ..Default::default()
            }],
        }),
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            spec: Some(pod_spec),
        },
        ..Default::default()
    };

    CronJob {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(opts.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: config.schedules.expression(schedule).to_string(),
            time_zone: Some(config.schedules.time_zone().to_string()),
            concurrency_policy: Some("Forbid".to_string()),
            starting_deadline_seconds: Some(STARTING_DEADLINE_SECONDS),
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(3),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(job_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_yaml<T: Serialize>(kind: &str, resource: &T) -> Result<String, Error> {
    serde_yaml::to_string(resource)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Generate the trigger manifests as a multi-document YAML stream.
///
/// The RBAC objects land in the pool's namespace; everything else in
/// `opts.namespace`.
pub fn generate_trigger_manifests(
    config: &SchedulerConfig,
    opts: &TriggerOptions,
) -> Result<String, Error> {
    let pool = config.pool_id()?;
    let mut documents = vec![
        to_yaml("ServiceAccount", &service_account(opts))?,
        to_yaml("ConfigMap", &config_map(opts))?,
        to_yaml("Role", &role(opts, &pool.namespace, &pool.name))?,
        to_yaml("RoleBinding", &role_binding(opts, &pool.namespace))?,
    ];
    for schedule in Schedule::ALL {
        documents.push(to_yaml("CronJob", &cron_job(opts, config, schedule))?);
    }
    Ok(documents.join("---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
pool:
  namespace: capi-prod
  machineDeployment: prod-pool-general
profiles:
  up: { minSize: 2, maxSize: 10, desiredSize: 6 }
  down: { minSize: 0, maxSize: 10, desiredSize: 0 }
callTimeoutSeconds: 15
schedules:
  up: "0 7 * * 1-5"
  down: "0 19 * * 1-5"
  timeZone: Europe/Berlin
"#;

    fn config() -> SchedulerConfig {
        SchedulerConfig::from_yaml(CONFIG).unwrap()
    }

    fn opts() -> TriggerOptions {
        TriggerOptions {
            name: "prod-general".to_string(),
            namespace: "capsched-system".to_string(),
            image: "ghcr.io/example/capsched:0.1.0".to_string(),
            config_yaml: CONFIG.to_string(),
        }
    }

    #[test]
    fn generates_one_cronjob_per_schedule() {
        let yaml = generate_trigger_manifests(&config(), &opts()).unwrap();
        let docs: Vec<serde_yaml::Value> = yaml
            .split("---\n")
            .map(|d| serde_yaml::from_str(d).unwrap())
            .collect();
        let kinds: Vec<&str> = docs.iter().filter_map(|d| d["kind"].as_str()).collect();
        assert_eq!(
            kinds,
            vec!["ServiceAccount", "ConfigMap", "Role", "RoleBinding", "CronJob", "CronJob"]
        );
        assert_eq!(docs[4]["metadata"]["name"], "prod-general-up");
        assert_eq!(docs[5]["metadata"]["name"], "prod-general-down");
    }

    #[test]
    fn cronjob_is_serialized_with_explicit_zone_and_no_overlap() {
        let job = cron_job(&opts(), &config(), Schedule::Down);
        let spec = job.spec.unwrap();
        assert_eq!(spec.schedule, "0 19 * * 1-5");
        assert_eq!(spec.time_zone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));

        let job_spec = spec.job_template.spec.unwrap();
        let pod = job_spec.template.spec.unwrap();
        assert_eq!(pod.active_deadline_seconds, Some(3 * 15 + 30));
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let args = pod.containers[0].args.clone().unwrap();
        assert_eq!(
            args,
            vec!["run", "--schedule", "down", "--config", "/etc/capsched/config.yaml"]
        );
    }

    #[test]
    fn job_deadline_leaves_room_for_every_retry() {
        let config = config();
        let job_spec = cron_job(&opts(), &config, Schedule::Up)
            .spec
            .unwrap()
            .job_template
            .spec
            .unwrap();
        let per_attempt = job_spec
            .template
            .spec
            .as_ref()
            .unwrap()
            .active_deadline_seconds
            .unwrap();
        let attempts = i64::from(job_spec.backoff_limit.unwrap()) + 1;
        // 10s, 20s, 40s between the four attempts
        let backoff = 10 + 20 + 40;

        assert_eq!(per_attempt, invocation_deadline_seconds(&config));
        assert!(
            job_spec.active_deadline_seconds.unwrap() >= attempts * per_attempt + backoff,
            "{:?}",
            job_spec.active_deadline_seconds
        );
    }

    #[test]
    fn default_timeout_job_deadline_covers_hanging_retries() {
        let config = SchedulerConfig::from_yaml(&CONFIG.replace("callTimeoutSeconds: 15\n", ""))
            .unwrap();
        assert_eq!(config.call_timeout_seconds, 10);
        assert_eq!(invocation_deadline_seconds(&config), 60);
        assert_eq!(job_deadline_seconds(&config), 4 * 60 + 70);
    }

    #[test]
    fn permanent_failures_fail_the_job_without_retry() {
        let job = cron_job(&opts(), &config(), Schedule::Up);
        let policy = job
            .spec
            .unwrap()
            .job_template
            .spec
            .unwrap()
            .pod_failure_policy
            .unwrap();
        let rule = &policy.rules[0];
        assert_eq!(rule.action, "FailJob");
        let codes = rule.on_exit_codes.as_ref().unwrap();
        assert_eq!(codes.values, vec![EXIT_PERMANENT_FAILURE]);
        assert!(!codes.values.contains(&EXIT_TRANSIENT_FAILURE));
    }

    #[test]
    fn role_is_scoped_to_the_pool() {
        let role = role(&opts(), "capi-prod", "prod-pool-general");
        assert_eq!(role.metadata.namespace.as_deref(), Some("capi-prod"));
        let rules = role.rules.unwrap();
        let md_rule = rules
            .iter()
            .find(|r| r.verbs.contains(&"patch".to_string()) && r.resource_names.is_some())
            .unwrap();
        assert_eq!(
            md_rule.resource_names.as_ref().unwrap(),
            &vec!["prod-pool-general".to_string()]
        );
        assert_eq!(md_rule.verbs, vec!["get".to_string(), "patch".to_string()]);
        assert!(!rules.iter().any(|r| r.verbs.contains(&"delete".to_string())));
    }

    #[test]
    fn binding_points_at_job_service_account() {
        let binding = role_binding(&opts(), "capi-prod");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.name, "prod-general");
        assert_eq!(subject.namespace.as_deref(), Some("capsched-system"));
    }

    #[test]
    fn config_map_carries_config_verbatim() {
        let cm = config_map(&opts());
        assert_eq!(cm.data.unwrap()[CONFIG_KEY], CONFIG);
    }
}
