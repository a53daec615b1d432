//! One feedback sprint: extract the creative, poll the personas, cluster
//! their feedback and assemble the report.

use std::{collections::BTreeMap, fmt::Write};

use anyhow::{Context, Result};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::{
    chart::{Bar, BarChart},
    cluster::{self, KMeans},
    creative::{CreativeExtractor, UploadedFile},
    llm::{Embedder, TextGenerator},
    persona::{self, PersonaGroup, VARIANTS_PER_SPRINT},
    reaction,
    settings::SprintSettings,
};

const CHART_TITLE: &str = "Mean Intent by Cluster";
const CHART_X_LABEL: &str = "cluster";
const CHART_Y_LABEL: &str = "Intent 0–10";

/// Observer of the reaction loop.
pub trait ProgressSink {
    fn report(&self, fraction: f64, label: &str);
}

impl<F: Fn(f64, &str)> ProgressSink for F {
    fn report(&self, fraction: f64, label: &str) {
        self(fraction, label);
    }
}

/// One persona's row in the response table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactionRecord {
    pub persona: String,
    pub cluster: usize,
    pub intent: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub mean_intent: f64,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SprintReport {
    /// Markdown overview: overall mean intent and one bullet per theme.
    pub summary: String,
    pub responses: Vec<ReactionRecord>,
    pub clusters: Vec<ClusterSummary>,
    pub chart: BarChart,
}

#[derive(Debug, Clone)]
pub struct SprintOptions {
    pub kmeans: KMeans,
    pub snippets_per_cluster: usize,
    pub seed: Option<u64>,
}

impl Default for SprintOptions {
    fn default() -> Self {
        Self {
            kmeans: KMeans::new(5),
            snippets_per_cluster: 10,
            seed: None,
        }
    }
}

impl From<&SprintSettings> for SprintOptions {
    fn from(settings: &SprintSettings) -> Self {
        Self {
            kmeans: KMeans {
                k: settings.clusters,
                runs: settings.kmeans_runs,
                max_iter: settings.kmeans_max_iter,
                ..KMeans::new(settings.clusters)
            },
            snippets_per_cluster: settings.snippets_per_cluster,
            seed: settings.seed,
        }
    }
}

pub struct Sprint<'a> {
    generator: &'a dyn TextGenerator,
    embedder: &'a dyn Embedder,
    extractor: CreativeExtractor,
    options: SprintOptions,
    rng: StdRng,
}

impl<'a> Sprint<'a> {
    pub fn new(
        generator: &'a dyn TextGenerator,
        embedder: &'a dyn Embedder,
        extractor: CreativeExtractor,
        options: SprintOptions,
    ) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            generator,
            embedder,
            extractor,
            options,
            rng,
        }
    }

    /// Runs the whole pipeline. The first service failure aborts the run.
    pub async fn run(
        &mut self,
        file: &UploadedFile,
        segment: &str,
        groups: &[PersonaGroup],
        progress: Option<&dyn ProgressSink>,
    ) -> Result<SprintReport> {
        if self.options.kmeans.k == 0 {
            return Err(cluster::Error::NoClusters.into());
        }
        let creative = self.extractor.extract(file);
        let personas =
            persona::select_variants(segment, groups, VARIANTS_PER_SPRINT, &mut self.rng)?;
        let total = personas.len();
        info!("Starting sprint for segment `{segment}` with {total} personas");

        let mut feedback = Vec::with_capacity(total);
        let mut scores = Vec::with_capacity(total);
        for (i, persona) in personas.iter().enumerate() {
            let reaction = reaction::react(self.generator, persona, &creative)
                .await
                .with_context(|| {
                    format!("reaction of {} ({}/{total}) failed", persona.name, i + 1)
                })?;
            feedback.push(reaction.feedback);
            scores.push(reaction.score);
            if let Some(progress) = progress {
                let done = i + 1;
                progress.report(done as f64 / total as f64, &format!("{done}/{total} personas"));
            }
        }

        let labels = cluster::cluster(
            self.embedder,
            &feedback,
            &self.options.kmeans,
            &mut self.rng,
        )
        .await
        .context("clustering feedback failed")?;
        let themes = cluster::label(
            self.generator,
            &feedback,
            &labels,
            self.options.snippets_per_cluster,
        )
        .await
        .context("labelling clusters failed")?;

        let responses: Vec<ReactionRecord> = personas
            .into_iter()
            .zip(labels)
            .zip(feedback.into_iter().zip(&scores))
            .map(|((persona, cluster), (feedback, &intent))| ReactionRecord {
                persona: persona.name,
                cluster,
                intent,
                feedback,
            })
            .collect();
        let clusters = cluster_summaries(&responses, &themes);
        let chart = intent_chart(&clusters);
        let summary = summary_markdown(mean(&scores), &themes);

        Ok(SprintReport {
            summary,
            responses,
            clusters,
            chart,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean intent per cluster joined with the cluster themes, ordered by id.
/// Clusters without a theme are left out.
pub fn cluster_summaries(
    responses: &[ReactionRecord],
    themes: &BTreeMap<usize, String>,
) -> Vec<ClusterSummary> {
    let mut scores: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for record in responses {
        scores.entry(record.cluster).or_default().push(record.intent);
    }
    scores
        .into_iter()
        .filter_map(|(cluster, scores)| {
            themes.get(&cluster).map(|summary| ClusterSummary {
                cluster,
                mean_intent: mean(&scores),
                summary: summary.clone(),
            })
        })
        .collect()
}

pub fn intent_chart(clusters: &[ClusterSummary]) -> BarChart {
    let bars = clusters
        .iter()
        .map(|c| Bar {
            label: c.cluster.to_string(),
            value: c.mean_intent,
        })
        .collect();
    BarChart::new(CHART_TITLE, CHART_X_LABEL, CHART_Y_LABEL, bars)
}

pub fn summary_markdown(overall: f64, themes: &BTreeMap<usize, String>) -> String {
    let mut summary = format!("**Overall mean intent:** {overall:.1}/10\n\n**Key clusters:**\n");
    for (cluster, theme) in themes {
        let _ = writeln!(summary, "- **Cluster {cluster}** — {theme}");
    }
    summary
}
