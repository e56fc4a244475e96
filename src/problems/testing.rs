//! Package fixtures: small polygon packages built from shell scripts

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::CompileContext;
use crate::compilers::testing::shell_compiler;
use crate::compilers::Compiler;
use crate::safeexec::testing::fake_manager;
use crate::safeexec::Manager;

pub(crate) fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

pub(crate) const CHECKER: &str = r#"if [ "$(cat "$2")" = "$(cat "$3")" ]; then exit 0; fi
echo "wrong answer" >&2
exit 1
"#;

const SIMPLE_PROBLEM_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<problem short-name="a-plus-b">
    <names><name language="english" value="A+B"/></names>
    <statements>
        <statement language="english" path="statements/english/problem.tex" type="application/x-tex"/>
        <statement language="german" path="statements/german/problem.tex" type="application/x-tex"/>
    </statements>
    <judging>
        <testset name="tests">
            <time-limit>1000</time-limit>
            <memory-limit>67108864</memory-limit>
            <test-count>3</test-count>
            <input-path-pattern>tests/%02d</input-path-pattern>
            <answer-path-pattern>tests/%02d.a</answer-path-pattern>
            <tests>
                <test method="manual" sample="true" points="1" group="1"/>
                <test method="manual" points="1" group="1"/>
                <test cmd="gen 5 7" method="generated" points="3" group="2"/>
            </tests>
            <groups>
                <group name="1" points-policy="complete-group"/>
                <group name="2" points-policy="each-test"/>
            </groups>
        </testset>
    </judging>
    <files>
        <resources><file path="files/testlib.h" type="h.g++"/></resources>
        <executables>
            <executable><source path="files/gen.sh" type="sh"/></executable>
            <executable><source path="files/check.sh" type="sh"/></executable>
        </executables>
    </files>
    <assets>
        <checker type="testlib"><source path="files/check.sh" type="sh"/></checker>
        <solutions>
            <solution tag="main"><source path="solutions/main.sh" type="sh"/></solution>
        </solutions>
    </assets>
</problem>
"#;

const PROPERTIES: &str = r#"{
    "name": "A+B",
    "legend": "Sum two numbers, see picture.png.",
    "input": "Two integers.",
    "output": "Their sum.",
    "sampleTests": [{"input": "1 2\n", "output": "3\n"}]
}"#;

/// A + B with a generator, a checker and one statement
pub(crate) fn simple_package(path: &Path) {
    write_zip(
        path,
        &[
            ("problem.xml", SIMPLE_PROBLEM_XML),
            ("tests/01", "1 2\n"),
            ("tests/02", "10 20\n"),
            ("files/testlib.h", "// testlib\n"),
            ("files/gen.sh", "echo \"$1 $2\"\n"),
            ("files/check.sh", CHECKER),
            ("solutions/main.sh", "read a b; echo $((a + b))\n"),
            ("statements/english/problem-properties.json", PROPERTIES),
            ("statements/english/picture.png", "png"),
            ("statements/english/unused.png", "unused"),
        ],
    );
}

const SINGLE_TEST_PROBLEM_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<problem short-name="a-plus-b-single">
    <judging>
        <testset name="tests">
            <time-limit>1000</time-limit>
            <memory-limit>67108864</memory-limit>
            <input-path-pattern>tests/%02d</input-path-pattern>
            <answer-path-pattern>tests/%02d.a</answer-path-pattern>
            <tests><test method="manual" points="1" group="1"/></tests>
            <groups><group name="1" points-policy="each-test"/></groups>
        </testset>
    </judging>
    <assets>
        <checker type="testlib"><source path="files/check.sh" type="sh"/></checker>
        <solutions>
            <solution tag="main"><source path="solutions/main.sh" type="sh"/></solution>
        </solutions>
    </assets>
</problem>
"#;

/// A + B with a single test worth one point
pub(crate) fn single_test_package(path: &Path) {
    write_zip(
        path,
        &[
            ("problem.xml", SINGLE_TEST_PROBLEM_XML),
            ("tests/01", "1 2\n"),
            ("files/check.sh", CHECKER),
            ("solutions/main.sh", "read a b; echo $((a + b))\n"),
        ],
    );
}

const INTERACTIVE_PROBLEM_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<problem short-name="double">
    <judging>
        <testset name="tests">
            <time-limit>1000</time-limit>
            <memory-limit>67108864</memory-limit>
            <test-count>1</test-count>
            <input-path-pattern>tests/%02d</input-path-pattern>
            <answer-path-pattern>tests/%02d.a</answer-path-pattern>
            <tests><test method="manual"/></tests>
        </testset>
    </judging>
    <assets>
        <checker type="testlib"><source path="files/check.sh" type="sh"/></checker>
        <interactor><source path="files/interactor.sh" type="sh"/></interactor>
        <solutions>
            <solution tag="main"><source path="solutions/main.sh" type="sh"/></solution>
        </solutions>
    </assets>
</problem>
"#;

/// Interactor sends the input, expects it doubled and records the reply
pub(crate) const INTERACTOR: &str = r#"n=$(cat "$1")
echo "$n"
read answer
echo "$answer" > "$2"
if [ "$answer" = "$((n * 2))" ]; then exit 0; fi
exit 1
"#;

pub(crate) fn interactive_package(path: &Path) {
    write_zip(
        path,
        &[
            ("problem.xml", INTERACTIVE_PROBLEM_XML),
            ("tests/01", "21\n"),
            ("files/check.sh", CHECKER),
            ("files/interactor.sh", INTERACTOR),
            ("solutions/main.sh", "read n; echo $((n * 2))\n"),
        ],
    );
}

/// Resolves every name to a shell compiler over an empty image
pub(crate) struct ShellCompileContext {
    layer: PathBuf,
    safeexec: Arc<Manager>,
}

impl ShellCompileContext {
    pub(crate) fn new(dir: &Path) -> Self {
        let layer = dir.join("image");
        std::fs::create_dir_all(&layer).unwrap();
        Self {
            layer,
            safeexec: Arc::new(fake_manager(dir)),
        }
    }
}

#[async_trait]
impl CompileContext for ShellCompileContext {
    async fn get_compiler(&self, name: &str, _cancel: &CancellationToken) -> Result<Compiler> {
        if name == "missing" {
            bail!("Cannot get compiler {:?}", name);
        }
        Ok(shell_compiler(self.layer.clone(), self.safeexec.clone()))
    }
}
