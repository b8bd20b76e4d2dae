//! Article prompt and response parsing.
//!
//! The model is asked to answer in four labelled sections:
//!
//! ```text
//! TITRE : ...
//! INTRODUCTION : ...
//! ARTICLE : ...
//! CONCLUSION : ...
//! ```

use crate::domain::ArticleResult;

/// Title used when the response has no recognisable sections
pub const FALLBACK_TITLE: &str = "Article généré";

const INSTRUCTIONS: &str = "\
RÔLE

Vous êtes rédacteur de contenu pour une radio locale. Vos textes doivent être \
indiscernables de ceux rédigés par des humains : nuances émotionnelles, \
pertinence culturelle, authenticité.

OBJECTIF

Rédigez un article d'actualité à partir de la transcription d'une émission \
radio fournie ci-dessous.

PUBLIC CIBLE : CSP+ 30/60 ans
NOMBRE DE MOTS : 1500

EXIGENCES

• Ton conversationnel et engageant, score de lecture Flesch autour de 80.
• Phrases de longueurs variées, transitions naturelles entre les sections.
• Sous-titres accrocheurs et naturels.
• Pour une citation, donner le prénom et le nom.
• Éviter les adverbes excessifs et les formules toutes faites.

FORMAT DE SORTIE OBLIGATOIRE :

TITRE : [Un titre accrocheur et informatif]
INTRODUCTION : [2-3 phrases d'accroche pour captiver le lecteur]
ARTICLE : [Le corps de l'article structuré avec des sous-titres naturels]
CONCLUSION : [Une phrase finale impactante]
";

/// Build the generation prompt; the transcript is cut to `char_limit` chars
pub fn build_prompt(file_name: &str, transcript: &str, char_limit: usize) -> String {
    let excerpt: String = transcript.chars().take(char_limit).collect();

    format!(
        "{}\n---\n\nFichier audio source : {}\n\nTRANSCRIPTION DE L'ÉMISSION RADIO :\n{}\n\n---\n\n\
         Rédigez maintenant l'article en suivant toutes les directives ci-dessus.",
        INSTRUCTIONS, file_name, excerpt
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Titre,
    Introduction,
    Article,
    Conclusion,
}

const MARKERS: [(&str, Section); 4] = [
    ("TITRE", Section::Titre),
    ("INTRODUCTION", Section::Introduction),
    ("ARTICLE", Section::Article),
    ("CONCLUSION", Section::Conclusion),
];

/// Recognise a section header line, returning the section and the text
/// after its colon
fn header(line: &str) -> Option<(Section, &str)> {
    let trimmed = line.trim_start_matches(|c: char| c == '*' || c == '#' || c.is_whitespace());

    MARKERS.iter().find_map(|(marker, section)| {
        let rest = trimmed.strip_prefix(marker)?.trim_start();
        let rest = rest.trim_start_matches('*').trim_start();
        rest.strip_prefix(':').map(|after| (*section, after))
    })
}

fn clean(text: &str) -> String {
    text.replace('*', "").trim().to_string()
}

/// Split a model response into the article fields.
///
/// If neither a title nor a body is found the whole response becomes the
/// article under [`FALLBACK_TITLE`].
pub fn parse_article(response: &str) -> ArticleResult {
    let mut titre = String::new();
    let mut introduction = Vec::new();
    let mut article = Vec::new();
    let mut conclusion = Vec::new();
    let mut current: Option<Section> = None;

    for line in response.lines() {
        let (section, text) = match header(line) {
            Some((section, rest)) => {
                current = Some(section);
                (section, rest)
            }
            None => match current {
                Some(section) => (section, line),
                None => continue,
            },
        };

        match section {
            Section::Titre => {
                if titre.trim().is_empty() {
                    titre = clean(text);
                }
            }
            Section::Introduction => introduction.push(text),
            Section::Article => article.push(text),
            Section::Conclusion => conclusion.push(text),
        }
    }

    let mut result = ArticleResult {
        titre,
        introduction: clean(&introduction.join("\n")),
        article: clean(&article.join("\n")),
        conclusion: clean(&conclusion.join("\n")),
    };

    if result.titre.is_empty() && result.article.is_empty() {
        result.titre = FALLBACK_TITLE.to_string();
        result.article = response.trim().to_string();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_truncates_on_char_boundary() {
        let transcript = "é".repeat(10);
        let prompt = build_prompt("talk.mp3", &transcript, 4);

        assert!(prompt.contains("Fichier audio source : talk.mp3"));
        assert!(prompt.contains(&"é".repeat(4)));
        assert!(!prompt.contains(&"é".repeat(5)));
    }

    #[test]
    fn test_parse_sections() {
        let response = "\
TITRE : Le **grand** retour
INTRODUCTION : Une intro.
Sur deux lignes.
ARTICLE :
## Premier temps
Le corps de l'article.
CONCLUSION : Fin.";

        let result = parse_article(response);
        assert_eq!(result.titre, "Le grand retour");
        assert_eq!(result.introduction, "Une intro.\nSur deux lignes.");
        assert_eq!(result.article, "## Premier temps\nLe corps de l'article.");
        assert_eq!(result.conclusion, "Fin.");
    }

    #[test]
    fn test_parse_bold_headers() {
        let response = "**TITRE :** Titre\n**INTRODUCTION :** Intro\n**ARTICLE :** Corps\n**CONCLUSION :** Fin";
        let result = parse_article(response);

        assert_eq!(
            result,
            ArticleResult {
                titre: "Titre".to_string(),
                introduction: "Intro".to_string(),
                article: "Corps".to_string(),
                conclusion: "Fin".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_fallback() {
        let result = parse_article("Just some free text without sections.");
        assert_eq!(result.titre, FALLBACK_TITLE);
        assert_eq!(result.article, "Just some free text without sections.");
        assert!(result.introduction.is_empty());
    }
}
