//! Worker fixture: memory store, local blobs, fake sandbox and a shell
//! compiler registered as `sh`

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::compile_context::BaseCompileContext;
use super::Invoker;
use crate::compilers::cache::testing::write_image;
use crate::compilers::testing::shell_config;
use crate::compilers::CompilerImageManager;
use crate::core::utils::random_name;
use crate::models::{self, CompilerConfig, Solution, Task, TaskKind};
use crate::problems::testing::ShellCompileContext;
use crate::problems::{build_compiled_problem, PolygonProblem, Problem, ProblemPackageManager};
use crate::safeexec::testing::fake_manager;
use crate::storage::{FileManager, LocalBlobs};
use crate::store::Core;

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub core: Core,
    pub files: FileManager,
    pub invoker: Invoker,
    pub compiler_id: i64,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let core = Core::memory();
        let blobs = LocalBlobs::new(dir.path().join("blobs")).await.unwrap();
        let files = FileManager::new(core.files.clone(), Arc::new(blobs));
        let images = CompilerImageManager::new(
            files.clone(),
            Arc::new(fake_manager(dir.path())),
            dir.path().join("compilers"),
        )
        .unwrap();
        let packages = ProblemPackageManager::new(files.clone(), dir.path().join("problems")).unwrap();
        let invoker = Invoker::new(core.clone(), files.clone(), images, packages);
        let mut fixture = Self {
            dir,
            core,
            files,
            invoker,
            compiler_id: 0,
        };
        fixture.compiler_id = fixture.create_compiler("sh", shell_config()).await;
        fixture
            .core
            .settings
            .set("invoker.compilers.polygon.sh", "sh")
            .await
            .unwrap();
        fixture
    }

    /// Register a compiler over a fresh shell image
    pub async fn create_compiler(&self, name: &str, config: CompilerConfig) -> i64 {
        let archive = self.dir.path().join(format!("{}.tar.gz", random_name()));
        write_image(&archive, &[("README", "shell image\n")]);
        let mut image = self.files.upload_file("image.tar.gz", &archive).await.unwrap();
        self.files.confirm_upload_file(&mut image).await.unwrap();
        let mut compiler = models::Compiler {
            id: 0,
            name: name.to_string(),
            image_id: image.id,
            config,
        };
        self.core.compilers.create(&mut compiler).await.unwrap();
        compiler.id
    }

    pub fn base_compile_context(&self) -> BaseCompileContext {
        BaseCompileContext::new(
            self.core.compilers.clone(),
            self.invoker.compiler_images.clone(),
        )
    }

    async fn upload(&self, name: &str, path: &Path) -> i64 {
        let mut file = self.files.upload_file(name, path).await.unwrap();
        self.files.confirm_upload_file(&mut file).await.unwrap();
        file.id
    }

    /// Problem with only a polygon package built by `package`
    pub async fn polygon_problem(&self, package: fn(&Path)) -> models::Problem {
        let archive = self.dir.path().join(format!("{}.zip", random_name()));
        package(&archive);
        let mut problem = models::Problem {
            id: 0,
            title: "Problem".to_string(),
            package_id: Some(self.upload("package.zip", &archive).await),
            compiled_id: None,
            config: Default::default(),
        };
        self.core.problems.create(&mut problem).await.unwrap();
        problem
    }

    /// Problem with a compiled package built from the polygon `package`
    pub async fn compiled_problem(&self, package: fn(&Path)) -> models::Problem {
        let mut problem = self.polygon_problem(package).await;
        let archive = self.dir.path().join(format!("{}.zip", random_name()));
        package(&archive);
        let polygon =
            PolygonProblem::extract(&archive, &self.dir.path().join(random_name())).unwrap();
        let polygon = Problem::Polygon(polygon);
        let ctx = ShellCompileContext::new(&self.dir.path().join(random_name()));
        let cancel = CancellationToken::new();
        polygon.compile(&ctx, &cancel).await.unwrap();
        let compiled = self.dir.path().join(format!("{}.zip", random_name()));
        build_compiled_problem(&ctx, &polygon, &compiled, &cancel)
            .await
            .unwrap();
        problem.compiled_id = Some(self.upload("problem.zip", &compiled).await);
        self.core.problems.update(&problem).await.unwrap();
        problem
    }

    pub async fn solution(&self, problem: &models::Problem, content: &str) -> Solution {
        let mut solution = Solution {
            id: 0,
            problem_id: problem.id,
            compiler_id: self.compiler_id,
            content: content.to_string(),
            content_id: None,
            report: None,
        };
        self.core.solutions.create(&mut solution).await.unwrap();
        solution
    }

    /// Queue a task, returning its id
    pub async fn queue<C: Serialize>(&self, kind: TaskKind, config: &C) -> i64 {
        let mut task = Task::new(kind, config).unwrap();
        self.core.tasks.create(&mut task).await.unwrap();
        task.id
    }
}
