//! Rebuilding of problem data from its polygon package
//!
//! Optionally compiles the package into the compiled format used for
//! judging, then brings the problem limits, statements and statement
//! resources in line with the package.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::compile_context::{BaseCompileContext, PolygonCompileContext};
use super::registry::TaskImpl;
use super::task::TaskContext;
use super::Invoker;
use crate::compilers::CompilerImageManager;
use crate::models::{
    File, Problem, ProblemConfig, ProblemResource, ProblemResourceKind, ProblemStatementConfig,
    ProblemStatementResourceConfig, UpdateProblemPackageTaskConfig, UpdateProblemPackageTaskState,
};
use crate::problems::{self, build_compiled_problem, ProblemKind, ProblemPackageManager};
use crate::storage::FileManager;
use crate::store::Core;

pub struct UpdateProblemPackageTask {
    core: Core,
    files: FileManager,
    compiler_images: CompilerImageManager,
    problem_packages: ProblemPackageManager,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ResourceKey {
    kind: ProblemResourceKind,
    locale: String,
    name: String,
}

#[derive(Debug)]
enum ResourceEvent {
    Create(ProblemResource),
    Update(ProblemResource),
    Delete(ProblemResource),
}

impl ResourceEvent {
    fn resource_mut(&mut self) -> &mut ProblemResource {
        match self {
            ResourceEvent::Create(resource)
            | ResourceEvent::Update(resource)
            | ResourceEvent::Delete(resource) => resource,
        }
    }

    fn into_resource(self) -> ProblemResource {
        match self {
            ResourceEvent::Create(resource)
            | ResourceEvent::Update(resource)
            | ResourceEvent::Delete(resource) => resource,
        }
    }
}

/// Planned changes of problem resources
#[derive(Default)]
struct ResourceChanges {
    events: BTreeMap<ResourceKey, ResourceEvent>,
    duplicates: Vec<ProblemResource>,
    /// New content for created and updated statement resources
    uploads: BTreeMap<ResourceKey, PathBuf>,
}

impl ResourceChanges {
    /// Start from deleting every existing resource; later records with the
    /// same key push earlier ones into `duplicates`.
    fn new(resources: Vec<ProblemResource>) -> Self {
        let mut changes = Self::default();
        for resource in resources {
            let key = match resource.kind {
                ProblemResourceKind::Statement => {
                    let Ok(config) = resource.scan_config::<ProblemStatementConfig>() else {
                        continue;
                    };
                    ResourceKey {
                        kind: resource.kind,
                        locale: config.locale,
                        name: String::new(),
                    }
                }
                ProblemResourceKind::StatementResource => {
                    let Ok(config) = resource.scan_config::<ProblemStatementResourceConfig>()
                    else {
                        continue;
                    };
                    ResourceKey {
                        kind: resource.kind,
                        locale: config.locale,
                        name: config.name,
                    }
                }
            };
            if let Some(duplicate) = changes.events.insert(key, ResourceEvent::Delete(resource)) {
                changes.duplicates.push(duplicate.into_resource());
            }
        }
        changes
    }

    /// Existing resource for `key` turned into an update, or a new one
    fn upsert(&mut self, key: &ResourceKey, problem_id: i64) -> &mut ResourceEvent {
        let event = match self.events.remove(key) {
            Some(ResourceEvent::Create(resource)) => ResourceEvent::Create(resource),
            Some(event) => ResourceEvent::Update(event.into_resource()),
            None => ResourceEvent::Create(ProblemResource::new(problem_id, key.kind)),
        };
        self.events.entry(key.clone()).or_insert(event)
    }
}

impl UpdateProblemPackageTask {
    pub fn factory(invoker: &Invoker) -> Box<dyn TaskImpl> {
        Box::new(Self {
            core: invoker.core.clone(),
            files: invoker.files.clone(),
            compiler_images: invoker.compiler_images.clone(),
            problem_packages: invoker.problem_packages.clone(),
        })
    }

    /// Compile the package and write the compiled archive to `target`
    async fn compile_problem(
        &self,
        problem: &problems::Problem,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let base =
            BaseCompileContext::new(self.core.compilers.clone(), self.compiler_images.clone());
        let ctx = PolygonCompileContext::new(&base, self.core.settings.clone());
        let result = async {
            problem
                .compile(&ctx, cancel)
                .await
                .context("Cannot compile problem")?;
            build_compiled_problem(&ctx, problem, target, cancel)
                .await
                .context("Cannot build compiled problem")
        }
        .await;
        base.release().await;
        result
    }

    async fn update(
        &self,
        ctx: &TaskContext,
        config: &UpdateProblemPackageTaskConfig,
        mut problem: Problem,
        resources: Vec<ProblemResource>,
        package: &problems::Problem,
        dir: &Path,
    ) -> Result<()> {
        let cancel = ctx.cancel_token();
        let compiled_path = dir.join("problem.zip");
        if config.compile {
            self.compile_problem(package, &compiled_path, cancel).await?;
        }
        let test_sets = package.test_sets().context("Cannot get test sets")?;
        problem.config = test_sets
            .iter()
            .fold(ProblemConfig::default(), |config, test_set| ProblemConfig {
                time_limit: config.time_limit.max(test_set.time_limit),
                memory_limit: config.memory_limit.max(test_set.memory_limit),
            });

        let mut changes = ResourceChanges::new(resources);
        let statements = package.statements().context("Cannot read problem")?;
        for statement in &statements {
            let locale = statement.locale().to_string();
            let key = ResourceKey {
                kind: ProblemResourceKind::Statement,
                locale: locale.clone(),
                name: String::new(),
            };
            changes
                .upsert(&key, problem.id)
                .resource_mut()
                .set_config(&statement.config)?;
            for resource in &statement.resources {
                let key = ResourceKey {
                    kind: ProblemResourceKind::StatementResource,
                    locale: locale.clone(),
                    name: resource.name.clone(),
                };
                let existing_file_id = match changes.events.get(&key) {
                    Some(ResourceEvent::Delete(existing)) => existing.file_id,
                    _ => None,
                };
                if let Some(file_id) = existing_file_id {
                    let file = self.files.get_file(file_id).await?;
                    if file.hash == resource.hash()? {
                        debug!("Statement resource {:?} is unchanged", resource.name);
                        changes.events.remove(&key);
                        continue;
                    }
                }
                changes
                    .upsert(&key, problem.id)
                    .resource_mut()
                    .set_config(&ProblemStatementResourceConfig {
                        locale: locale.clone(),
                        name: resource.name.clone(),
                    })?;
                changes.uploads.insert(key, resource.path.clone());
            }
        }

        let previous_compiled_id = problem.compiled_id;
        let mut files: Vec<File> = Vec::new();
        if config.compile {
            let file = self
                .files
                .upload_file("problem.zip", &compiled_path)
                .await
                .context("Cannot upload compiled package")?;
            problem.compiled_id = Some(file.id);
            files.push(file);
        }
        for (key, path) in &changes.uploads {
            let Some(event) = changes.events.get_mut(key) else {
                continue;
            };
            let file = self.files.upload_file(&key.name, path).await?;
            event.resource_mut().file_id = Some(file.id);
            files.push(file);
        }
        for file in &mut files {
            self.files.confirm_upload_file(file).await?;
        }
        let resources = &self.core.problem_resources;
        for duplicate in &changes.duplicates {
            resources.delete(duplicate.id).await?;
        }
        for (_, event) in changes.events {
            match event {
                ResourceEvent::Create(mut resource) => resources.create(&mut resource).await?,
                ResourceEvent::Update(resource) => resources.update(&resource).await?,
                ResourceEvent::Delete(resource) => resources.delete(resource.id).await?,
            }
        }
        self.core.problems.update(&problem).await?;
        if let Some(previous_id) = previous_compiled_id {
            if problem.compiled_id != Some(previous_id) {
                self.problem_packages.delete(previous_id, ProblemKind::Compiled);
            }
        }
        info!("Problem {} updated from package", problem.id);
        Ok(())
    }
}

#[async_trait]
impl TaskImpl for UpdateProblemPackageTask {
    async fn execute(&mut self, ctx: &TaskContext) -> Result<()> {
        let config: UpdateProblemPackageTaskConfig = ctx
            .scan_config()
            .await
            .context("Unable to scan task config")?;
        let problem = self
            .core
            .problems
            .get(config.problem_id)
            .await
            .context("Unable to fetch problem")?;
        let file = self
            .files
            .get_file(config.file_id)
            .await
            .context("Unable to fetch file")?;
        debug!("Updating problem {} from file {:?}", problem.id, file.name);
        let resources = self
            .core
            .problem_resources
            .find_by_problem(problem.id)
            .await
            .context("Unable to fetch resources")?;
        let package_id = problem
            .package_id
            .context("Unable to fetch package: problem has no package")?;
        let package = self
            .problem_packages
            .load_sync(package_id, ProblemKind::Polygon, ctx.cancel_token())
            .await
            .context("Unable to fetch package")?;
        let package_problem = package
            .value()
            .context("Problem package is not loaded")?
            .problem();
        let dir = tempfile::Builder::new()
            .prefix("package-")
            .tempdir()
            .context("Cannot create temp dir")?;
        let result = self
            .update(ctx, &config, problem, resources, package_problem, dir.path())
            .await;
        if let Err(err) = &result {
            let state = UpdateProblemPackageTaskState {
                error: format!("{:#}", err),
            };
            if let Err(err) = ctx.set_state(&state).await {
                error!("Cannot set task state: {:#}", err);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::testing::Fixture;
    use crate::models::{TaskKind, TaskStatus};
    use crate::problems::testing::simple_package;
    use tokio_test::assert_ok;

    async fn run(fixture: &Fixture, problem: &Problem, compile: bool) -> i64 {
        let config = UpdateProblemPackageTaskConfig {
            problem_id: problem.id,
            file_id: problem.package_id.unwrap(),
            compile,
        };
        let task_id = fixture.queue(TaskKind::UpdateProblemPackage, &config).await;
        assert!(fixture.invoker.run_tick(&CancellationToken::new()).await);
        task_id
    }

    async fn statement_resources(fixture: &Fixture, problem_id: i64) -> Vec<ProblemResource> {
        assert_ok!(fixture.core.problem_resources.find_by_problem(problem_id).await)
    }

    #[tokio::test]
    async fn test_compile_and_sync_resources() {
        let fixture = Fixture::new().await;
        let problem = fixture.polygon_problem(simple_package).await;

        let task_id = run(&fixture, &problem, true).await;
        let task = fixture.core.tasks.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);

        let updated = fixture.core.problems.get(problem.id).await.unwrap();
        assert_eq!(updated.config.time_limit, 1000);
        assert_eq!(updated.config.memory_limit, 64 << 20);
        let compiled_id = updated.compiled_id.unwrap();
        let compiled = fixture.files.get_file(compiled_id).await.unwrap();
        assert_eq!(compiled.status, crate::models::FileStatus::Available);

        let resources = statement_resources(&fixture, problem.id).await;
        assert_eq!(resources.len(), 2);
        let statement = resources
            .iter()
            .find(|r| r.kind == ProblemResourceKind::Statement)
            .unwrap();
        let config = statement.scan_config::<ProblemStatementConfig>().unwrap();
        assert_eq!(config.locale, "en");
        assert_eq!(config.title, "A+B");
        let picture = resources
            .iter()
            .find(|r| r.kind == ProblemResourceKind::StatementResource)
            .unwrap();
        let file = fixture.files.get_file(picture.file_id.unwrap()).await.unwrap();
        assert_eq!(file.name, "picture.png");

        // Judging works off the freshly compiled package.
        let solution = fixture.solution(&updated, "read a b; echo $((a + b))\n").await;
        let config = crate::models::JudgeSolutionTaskConfig {
            solution_id: solution.id,
            enable_points: false,
        };
        fixture.queue(TaskKind::JudgeSolution, &config).await;
        assert!(fixture.invoker.run_tick(&CancellationToken::new()).await);
        let judged = fixture.core.solutions.get(solution.id).await.unwrap();
        assert_eq!(judged.report.unwrap().verdict, crate::models::Verdict::Accepted);
    }

    #[tokio::test]
    async fn test_resync_keeps_unchanged_and_removes_stale() {
        let fixture = Fixture::new().await;
        let problem = fixture.polygon_problem(simple_package).await;
        run(&fixture, &problem, false).await;
        let before = statement_resources(&fixture, problem.id).await;
        assert_eq!(before.len(), 2);
        let picture = before
            .iter()
            .find(|r| r.kind == ProblemResourceKind::StatementResource)
            .unwrap()
            .clone();

        // A stale statement in another locale and a duplicate of the picture.
        let mut stale = ProblemResource::new(problem.id, ProblemResourceKind::Statement);
        stale
            .set_config(&ProblemStatementConfig {
                locale: "ru".to_string(),
                title: "A+B".to_string(),
                ..Default::default()
            })
            .unwrap();
        fixture.core.problem_resources.create(&mut stale).await.unwrap();
        let mut duplicate = picture.clone();
        fixture.core.problem_resources.create(&mut duplicate).await.unwrap();

        let task_id = run(&fixture, &problem, false).await;
        assert_eq!(
            fixture.core.tasks.get(task_id).await.unwrap().status,
            TaskStatus::Succeeded
        );
        let after = statement_resources(&fixture, problem.id).await;
        assert_eq!(after.len(), 2);
        let kept = after
            .iter()
            .find(|r| r.kind == ProblemResourceKind::StatementResource)
            .unwrap();
        // The newest record wins and its unchanged file is reused.
        assert_eq!(kept.id, duplicate.id);
        assert_eq!(kept.file_id, picture.file_id);
        assert!(after.iter().all(|r| r.id != stale.id && r.id != picture.id));
        assert!(fixture
            .core
            .problems
            .get(problem.id)
            .await
            .unwrap()
            .compiled_id
            .is_none());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_in_state() {
        let fixture = Fixture::new().await;
        let problem = fixture.polygon_problem(simple_package).await;
        fixture
            .core
            .settings
            .set("invoker.compilers.polygon.sh", "missing")
            .await
            .unwrap();

        let task_id = run(&fixture, &problem, true).await;
        let task = fixture.core.tasks.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let state: UpdateProblemPackageTaskState = task.scan_state().unwrap();
        assert!(state.error.starts_with("Cannot compile problem"));
        assert!(statement_resources(&fixture, problem.id).await.is_empty());
    }
}
