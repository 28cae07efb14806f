//! `helm-local extract-images`: render a chart and list the images it uses.

use std::collections::BTreeSet;
use std::process::Command;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use onprem_imageref::{
    extract_images_from_args, extract_images_from_text, images_from_yaml, normalize_image_name,
    text_registries, RegistryPatterns, REGISTRY_PATTERNS_ENV, TEXT_REGISTRIES_ENV,
};
use onprem_utils::{CommandRunExt, Reporter};

use crate::cli::ExtractImagesOpts;
use crate::config::ConfigManager;

const HELM: &str = "helm";
const CHART_FILE: &str = "Chart.yaml";
/// Release name passed to `helm template`; it does not affect image values.
const RELEASE_NAME: &str = "release";
/// Config key holding extra registry patterns.
const CONFIG_PATTERNS_KEY: &str = "helm.registry_patterns";

fn ensure_helm_installed() -> Result<()> {
    which::which(HELM)
        .map(|_| ())
        .map_err(|_| anyhow::anyhow!("Helm is not installed. See https://helm.sh/docs/intro/install/"))
}

/// The directory holding `Chart.yaml`: `dir` itself or one of its direct
/// subdirectories (packaged charts unpack into `<name>/`).
#[context("Locating {CHART_FILE} in {dir}")]
fn find_chart_root(dir: &Utf8Path) -> Result<Utf8PathBuf> {
    if dir.join(CHART_FILE).is_file() {
        return Ok(dir.to_owned());
    }
    let mut candidates = Vec::new();
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.path().join(CHART_FILE).is_file() {
            candidates.push(entry.into_path());
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No {CHART_FILE} found"))
}

/// Resolve the chart to a directory, unpacking archives into `workdir`.
#[context("Preparing chart {chart}")]
fn prepare_chart(chart: &Utf8Path, workdir: &Utf8Path) -> Result<Utf8PathBuf> {
    if chart.is_dir() {
        return find_chart_root(chart);
    }
    let name = chart.as_str();
    if !(name.ends_with(".tgz") || name.ends_with(".tar.gz")) {
        anyhow::bail!("Expected a chart directory or a .tgz archive");
    }
    tracing::info!("Unpacking {chart} into {workdir}");
    Command::new("tar")
        .args(["-xzf", chart.as_str(), "-C", workdir.as_str()])
        .run_capture_stderr()?;
    find_chart_root(workdir)
}

fn update_dependencies(chart: &Utf8Path) -> Result<()> {
    Command::new(HELM)
        .args(["dependency", "update", chart.as_str()])
        .run_get_string()
        .map(|_| ())
        .with_context(|| format!("Updating dependencies of {chart}"))
}

fn render_template(chart: &Utf8Path, values: &[Utf8PathBuf]) -> Result<String> {
    let mut cmd = Command::new(HELM);
    cmd.args(["template", RELEASE_NAME, chart.as_str()]);
    for v in values {
        cmd.args(["-f", v.as_str()]);
    }
    cmd.run_get_string()
        .with_context(|| format!("Rendering {chart}"))
}

/// Where to look for images besides manifest fields.
#[derive(Debug, Clone)]
pub(crate) struct ImageSources {
    /// Registry patterns for argument tokens.
    pub(crate) patterns: RegistryPatterns,
    /// Registries for the free-text scan.
    pub(crate) text_registries: Vec<String>,
}

/// Images named by manifest fields or found in free text (normalized
/// unless `raw`) together with those passed as arguments, sorted and
/// deduplicated.
pub(crate) fn collect_images(
    rendered: &str,
    sources: &ImageSources,
    raw: bool,
) -> Result<Vec<String>> {
    let mut found = images_from_yaml(rendered);
    found.extend(extract_images_from_text(rendered, &sources.text_registries)?);
    let mut images: BTreeSet<String> = found
        .into_iter()
        .map(|i| if raw { i } else { normalize_image_name(&i) })
        .collect();
    images.extend(extract_images_from_args(rendered, &sources.patterns));
    Ok(images.into_iter().collect())
}

/// Render the output: one image per line, or a JSON array.
fn format_images(images: &[String], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(images)?);
    }
    Ok(images.join("\n"))
}

/// Patterns from the command line and config file, plus the environment
/// override list; text registries extended from their own variable.
fn image_sources(
    cli: &[String],
    config: &ConfigManager,
    pattern_env: Option<&str>,
    registry_env: Option<&str>,
) -> Result<ImageSources> {
    let from_config = config.get_string_list(CONFIG_PATTERNS_KEY)?;
    let overrides = pattern_env
        .map(RegistryPatterns::parse_override_list)
        .unwrap_or_default();
    let extra_registries = registry_env
        .map(RegistryPatterns::parse_override_list)
        .unwrap_or_default();
    Ok(ImageSources {
        patterns: RegistryPatterns::new(cli.iter().cloned().chain(from_config), overrides),
        text_registries: text_registries(extra_registries),
    })
}

/// Run `helm-local extract-images`.
#[context("Extracting images from {}", opts.chart)]
pub(crate) fn extract_images(opts: &ExtractImagesOpts, reporter: &Reporter) -> Result<()> {
    if !opts.chart.exists() {
        anyhow::bail!("{} does not exist", opts.chart);
    }
    let sources = image_sources(
        &opts.registry_pattern,
        &ConfigManager::open_default()?,
        std::env::var(REGISTRY_PATTERNS_ENV).ok().as_deref(),
        std::env::var(TEXT_REGISTRIES_ENV).ok().as_deref(),
    )?;
    ensure_helm_installed()?;

    let workdir = tempfile::tempdir()?;
    let workdir_path = Utf8Path::from_path(workdir.path()).context("Non-UTF-8 temporary directory")?;
    let chart = prepare_chart(&opts.chart, workdir_path)?;

    let pb = reporter.spinner("Updating chart dependencies");
    let r = update_dependencies(&chart);
    pb.finish_and_clear();
    r?;

    let pb = reporter.spinner("Rendering chart");
    let rendered = render_template(&chart, &opts.values);
    pb.finish_and_clear();
    let rendered = rendered?;

    let images = collect_images(&rendered, &sources, opts.raw)?;
    tracing::info!("Found {} images in {}", images.len(), opts.chart);
    let out = format_images(&images, opts.json)?;
    if !out.is_empty() {
        println!("{out}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const RENDERED: &str = indoc! {"
        apiVersion: apps/v1
        kind: Deployment
        spec:
          template:
            spec:
              containers:
              - name: operator
                image: nginx
                args:
                - --prometheus-config-reloader=quay.io/prometheus-operator/prometheus-config-reloader:v0.81.0
        ---
        redis:
          repository: bitnami/redis
          tag: 7.2.4
    "};

    fn default_sources() -> ImageSources {
        ImageSources {
            patterns: RegistryPatterns::default(),
            text_registries: text_registries(std::iter::empty::<String>()),
        }
    }

    #[test]
    fn test_collect_images_normalized() -> Result<()> {
        let images = collect_images(RENDERED, &default_sources(), false)?;
        similar_asserts::assert_eq!(
            images,
            vec![
                "docker.io/bitnami/redis:7.2.4".to_string(),
                "docker.io/library/nginx:latest".to_string(),
                "quay.io/prometheus-operator/prometheus-config-reloader:v0.81.0".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_collect_images_raw() -> Result<()> {
        let images = collect_images(RENDERED, &default_sources(), true)?;
        similar_asserts::assert_eq!(
            images,
            vec![
                "bitnami/redis:7.2.4".to_string(),
                "nginx".to_string(),
                "quay.io/prometheus-operator/prometheus-config-reloader:v0.81.0".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_collect_images_from_env_values() -> Result<()> {
        let rendered = indoc! {r#"
            apiVersion: v1
            kind: Pod
            spec:
              containers:
              - name: app
                image: nginx
                env:
                - name: CUDA_IMAGE
                  value: "nvcr.io/nvidia/cuda:12.2.0"
                - name: HELPER
                  value: public.ecr.aws/org/helper
        "#};
        let images = collect_images(rendered, &default_sources(), false)?;
        similar_asserts::assert_eq!(
            images,
            vec![
                "docker.io/library/nginx:latest".to_string(),
                "nvcr.io/nvidia/cuda:12.2.0".to_string(),
                "public.ecr.aws/org/helper:latest".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_image_sources_from_env_and_config() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        let config = ConfigManager::new(dir);
        let rendered = indoc! {"
            args:
            - --sidecar=custom.io/x:y
            - --agent=cfg.example/agent:1
            env:
            - value: corp.local/team/app:2
        "};

        let sources = image_sources(&[], &config, None, None)?;
        assert!(collect_images(rendered, &sources, false)?.is_empty());

        config.set(
            CONFIG_PATTERNS_KEY,
            serde_yaml::Value::Sequence(vec!["cfg.example".into()]),
        )?;
        let sources = image_sources(&[], &config, Some(" custom.io , "), Some("corp.local"))?;
        similar_asserts::assert_eq!(
            collect_images(rendered, &sources, false)?,
            vec![
                "cfg.example/agent:1".to_string(),
                "corp.local/team/app:2".to_string(),
                "custom.io/x:y".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_format_images() -> Result<()> {
        let images = vec!["a:1".to_string(), "b:2".to_string()];
        assert_eq!(format_images(&images, false)?, "a:1\nb:2");
        assert_eq!(format_images(&images, true)?, "[\n  \"a:1\",\n  \"b:2\"\n]");
        assert_eq!(format_images(&[], true)?, "[]");
        Ok(())
    }

    #[test]
    fn test_find_chart_root() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        assert!(find_chart_root(dir).is_err());

        let nested = dir.join("mychart");
        std::fs::create_dir(&nested)?;
        std::fs::write(nested.join(CHART_FILE), "name: mychart\n")?;
        assert_eq!(find_chart_root(dir)?, nested);
        assert_eq!(find_chart_root(&nested)?, nested);
        Ok(())
    }

    #[test]
    fn test_prepare_chart_rejects_other_files() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        let file = dir.join("values.yaml");
        std::fs::write(&file, "")?;
        assert!(prepare_chart(&file, dir).is_err());
        Ok(())
    }
}
