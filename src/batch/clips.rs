use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of hook variants carried per language
pub const HOOKS_PER_LANGUAGE: usize = 4;

/// Fallback when a detected language has no hook entry
pub const FALLBACK_LANGUAGE: &str = "en";

/// Hook strings keyed by language code. Fixed-size rows keep the lookup
/// typed; unknown languages fall back to English explicitly.
const HOOK_TABLE: &[(&str, [&str; HOOKS_PER_LANGUAGE])] = &[
    (
        "en",
        [
            "You won't believe what happens next...",
            "Here's the one thing nobody tells you:",
            "Stop scrolling. This changes everything.",
            "The secret they don't want you to know:",
        ],
    ),
    (
        "es",
        [
            "No vas a creer lo que pasa después...",
            "Esto es lo que nadie te cuenta:",
            "Deja de hacer scroll. Esto lo cambia todo.",
            "El secreto que no quieren que sepas:",
        ],
    ),
    (
        "fr",
        [
            "Vous n'allez pas croire la suite...",
            "Voici ce que personne ne vous dit :",
            "Arrêtez de scroller. Tout change ici.",
            "Le secret qu'on vous cache :",
        ],
    ),
    (
        "de",
        [
            "Du wirst nicht glauben, was als Nächstes passiert...",
            "Das verrät dir sonst niemand:",
            "Hör auf zu scrollen. Das ändert alles.",
            "Das Geheimnis, das keiner kennt:",
        ],
    ),
    (
        "pt",
        [
            "Você não vai acreditar no que vem agora...",
            "Isto é o que ninguém te conta:",
            "Pare de rolar. Isso muda tudo.",
            "O segredo que escondem de você:",
        ],
    ),
];

/// Hooks for a language code, falling back to [`FALLBACK_LANGUAGE`].
pub fn hooks_for(language: &str) -> &'static [&'static str; HOOKS_PER_LANGUAGE] {
    HOOK_TABLE
        .iter()
        .find(|(code, _)| *code == language)
        .or_else(|| HOOK_TABLE.iter().find(|(code, _)| *code == FALLBACK_LANGUAGE))
        .map(|(_, hooks)| hooks)
        .expect("fallback language must exist in the hook table")
}

/// Output of the analyze phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentProfile {
    pub language: String,
    pub niche: String,
}

/// One short-form clip derived from a batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedClip {
    pub title: String,
    pub duration_secs: f64,
    pub hook: String,
    pub engagement_score: f64,
}

/// Per-item generation seam, injected into the batch scheduler so tests can
/// substitute failing or deterministic doubles.
#[async_trait]
pub trait ClipPipeline: Send + Sync {
    /// Detect language and niche from a transcript proxy.
    async fn analyze(&self, transcript: &str) -> Result<ContentProfile>;

    /// Produce the clip at `index` for an analyzed item.
    async fn generate_clip(&self, profile: &ContentProfile, index: usize)
        -> Result<GeneratedClip>;
}

/// Default clip generator: keyword-based language/niche detection plus
/// synthesized clip metadata.
#[derive(Debug, Default)]
pub struct ClipStudio;

impl ClipStudio {
    pub fn new() -> Self {
        Self
    }

    fn detect_language(transcript: &str) -> &'static str {
        let lower = transcript.to_lowercase();
        let markers: &[(&str, &[&str])] = &[
            ("es", &[" el ", " la ", " que ", " de ", " y "]),
            ("fr", &[" le ", " les ", " une ", " est ", " vous "]),
            ("de", &[" der ", " die ", " das ", " und ", " nicht "]),
            ("pt", &[" o ", " os ", " uma ", " não ", " você "]),
        ];

        let padded = format!(" {} ", lower);
        markers
            .iter()
            .map(|(code, words)| {
                let hits = words.iter().filter(|w| padded.contains(*w)).count();
                (*code, hits)
            })
            .filter(|(_, hits)| *hits >= 3)
            .max_by_key(|(_, hits)| *hits)
            .map(|(code, _)| code)
            .unwrap_or(FALLBACK_LANGUAGE)
    }

    fn detect_niche(transcript: &str) -> &'static str {
        let lower = transcript.to_lowercase();
        let buckets: &[(&str, &[&str])] = &[
            ("fitness", &["workout", "training", "muscle", "protein"]),
            ("finance", &["invest", "market", "stock", "budget"]),
            ("tech", &["software", "startup", "code", "ai "]),
            ("cooking", &["recipe", "ingredient", "oven", "flavor"]),
        ];

        buckets
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(niche, _)| *niche)
            .unwrap_or("lifestyle")
    }
}

#[async_trait]
impl ClipPipeline for ClipStudio {
    async fn analyze(&self, transcript: &str) -> Result<ContentProfile> {
        let profile = ContentProfile {
            language: Self::detect_language(transcript).to_string(),
            niche: Self::detect_niche(transcript).to_string(),
        };
        tracing::debug!(language = %profile.language, niche = %profile.niche, "item analyzed");
        Ok(profile)
    }

    async fn generate_clip(
        &self,
        profile: &ContentProfile,
        index: usize,
    ) -> Result<GeneratedClip> {
        let hooks = hooks_for(&profile.language);
        let (duration_secs, engagement_score) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(30.0..60.0),
                (rng.gen_range(55.0..98.0_f64) * 10.0).round() / 10.0,
            )
        };

        Ok(GeneratedClip {
            title: format!("{} highlight #{}", profile.niche, index + 1),
            duration_secs,
            hook: hooks[index % HOOKS_PER_LANGUAGE].to_string(),
            engagement_score,
        })
    }
}
