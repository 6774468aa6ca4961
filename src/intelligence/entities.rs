//! Family entity extraction
//!
//! Pulls people and facts about them out of informal chat text:
//! - Names with a relationship ("my son Sam", "Sam is my daughter")
//! - Ages ("Sam is 12", "my 7-year-old daughter Ava")
//! - Grades and schools ("Sam is in 6th grade", "Ava goes to Lincoln Elementary")
//! - Diagnoses from a fixed keyword dictionary
//! - Gender implied by the relationship word
//!
//! ## Invariants
//!
//! - Pure: same text + same known names always gives the same output
//! - Per attribute and person, the first matching template wins
//! - Capitalized stop words are never accepted as names
//! - Facts stated through pronouns go to the single subject of the
//!   message, or are dropped when the subject is ambiguous

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Gender, ProfilePatch, Relationship};

// =============================================================================
// Types
// =============================================================================

/// Everything extracted from one message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyExtraction {
    /// Children in order of first mention
    pub children: Vec<String>,
    /// Adults (self, spouse, relatives) in order of first mention
    pub adults: Vec<String>,
    pub ages: BTreeMap<String, u8>,
    pub grades: BTreeMap<String, String>,
    pub schools: BTreeMap<String, String>,
    pub diagnoses: BTreeMap<String, Vec<String>>,
    pub relationships: BTreeMap<String, Relationship>,
    pub genders: BTreeMap<String, Gender>,
}

impl FamilyExtraction {
    pub fn is_empty(&self) -> bool {
        self == &FamilyExtraction::default()
    }

    /// Every person the extraction says something about
    pub fn people(&self) -> BTreeSet<String> {
        self.children
            .iter()
            .chain(self.adults.iter())
            .chain(self.ages.keys())
            .chain(self.grades.keys())
            .chain(self.schools.keys())
            .chain(self.diagnoses.keys())
            .cloned()
            .collect()
    }

    /// Profile patch carrying the facts extracted for `name`
    pub fn to_patch(&self, name: &str) -> ProfilePatch {
        ProfilePatch {
            relationship: self.relationships.get(name).copied(),
            age: self.ages.get(name).map(|a| a.to_string()),
            gender: self.genders.get(name).copied(),
            grade: self.grades.get(name).cloned(),
            school: self.schools.get(name).cloned(),
            diagnoses: self.diagnoses.get(name).cloned().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Configuration for entity extraction
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Largest age accepted from general templates
    pub max_general_age: u8,
    /// Largest age accepted from child-specific templates
    pub max_child_age: u8,
    /// Additional capitalized words never treated as names
    pub extra_stop_words: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_general_age: 99,
            max_child_age: 24,
            extra_stop_words: Vec::new(),
        }
    }
}

// =============================================================================
// Pattern tables
// =============================================================================

const NAME: &str = r"(?P<name>[A-Z][a-z]+(?:-[A-Z][a-z]+)?)";
const CHILD_WORDS: &str =
    "son|daughter|child|kid|boy|girl|stepson|stepdaughter|toddler|baby|teenager|teen";
const SPOUSE_WORDS: &str = "husband|wife|partner|spouse|fiance|fiancee";
const BIRTH_ORDER: &str = r"(?:(?i:oldest|youngest|middle|little|older|younger)\s+)?";
const RELATIVE_WORDS: &str = "mother|mom|father|dad|sister|brother|grandmother|grandma|grandfather|grandpa|aunt|uncle|stepmom|stepdad";

static NAME_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][a-z]+(?:-[A-Z][a-z]+)?$").expect("valid regex"));

/// Capitalized words that start sentences or carry app jargon, never names
static STOP_WORDS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        // pronouns and determiners
        "I", "Me", "My", "Mine", "He", "Him", "His", "She", "Her", "Hers", "They", "Them",
        "Their", "We", "Us", "Our", "You", "Your", "It", "Its", "The", "This", "That",
        "These", "Those", "A", "An", "Some", "Any", "Every", "Each", "All", "Both",
        // connectives and adverbs
        "And", "But", "Or", "So", "Because", "Also", "Then", "When", "While", "If", "Though",
        "Although", "Just", "Really", "Very", "Actually", "Basically", "Honestly",
        "Sometimes", "Always", "Never", "Often", "Lately", "Recently", "Maybe", "Still",
        "Even", "Only", "Now", "Again", "Yet", "Here", "There", "Well", "Like", "Not",
        // verbs and adjectives
        "Is", "Was", "Are", "Were", "Be", "Been", "Has", "Have", "Had", "Can", "Could",
        "Will", "Would", "Should", "Does", "Did", "Do", "Get", "Gets", "Got", "Going",
        "Being", "Seems", "Feels", "Keeps", "Says", "Said", "Good", "Bad", "Great",
        "Happy", "Sad", "Angry", "Tired", "Worried", "Scared", "Sorry", "Fine", "Okay",
        "Ok", "Sure", "New", "Old", "Little", "Big", "Young", "Older", "Younger",
        "Oldest", "Youngest", "Middle", "Named", "Called", "Who", "Whom", "What",
        "Where", "Why", "How", "Which",
        // greetings
        "Hi", "Hello", "Hey", "Thanks", "Thank", "Please", "Yes", "No", "Yeah", "Nope",
        "Help",
        // time words
        "Today", "Tonight", "Yesterday", "Tomorrow", "Monday", "Tuesday", "Wednesday",
        "Thursday", "Friday", "Saturday", "Sunday", "January", "February", "March",
        "April", "June", "July", "August", "September", "October", "November",
        "December", "Morning", "Evening", "Weekend",
        // app jargon and family roles
        "Mom", "Mommy", "Dad", "Daddy", "Mum", "Mama", "Papa", "Grandma", "Grandpa",
        "Son", "Daughter", "Child", "Kid", "Kids", "Baby", "Teacher", "Doctor",
        "Therapist", "Coach", "Counselor", "Parent", "Parenting", "School", "Grade",
        "Kindergarten", "Preschool", "Class", "Homework", "Assistant", "Adhd", "Autism",
        "Anxiety", "Diagnosis",
    ]
    .into_iter()
    .collect()
});

/// How a relation template classifies the captured person
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersonKind {
    Child,
    Spouse,
    Relative,
    User,
}

impl PersonKind {
    fn relationship(&self) -> Relationship {
        match self {
            PersonKind::Child => Relationship::Child,
            PersonKind::Spouse => Relationship::Spouse,
            PersonKind::Relative => Relationship::Other,
            PersonKind::User => Relationship::User,
        }
    }
}

struct RelationTemplate {
    pattern: Regex,
    kind: PersonKind,
}

fn relation(pattern: &str, kind: PersonKind) -> RelationTemplate {
    let pattern = pattern
        .replace("{name}", NAME)
        .replace("{order}", BIRTH_ORDER)
        .replace("{child}", CHILD_WORDS)
        .replace("{spouse}", SPOUSE_WORDS)
        .replace("{relative}", RELATIVE_WORDS);
    RelationTemplate {
        pattern: Regex::new(&pattern).expect("valid regex"),
        kind,
    }
}

/// Ordered relation templates; earlier templates take precedence.
///
/// Inverted forms ("Sam is my son", "Sam, my son,") reject a possessive
/// relation word, so "Bedtime is my son's hardest time" names nobody. The
/// comma form must close the clause right after the relation word.
static RELATION_TEMPLATES: Lazy<Vec<RelationTemplate>> = Lazy::new(|| {
    vec![
        relation(
            r"\b(?i:my|our)\s+(?:(?P<age>\d{1,2})[- ](?i:year|yr)s?[- ](?i:old)\s+)?(?P<rel>(?i:{child}))(?:'s\s+name\s+is|,|\s+(?i:named|called))?\s+{name}\b",
            PersonKind::Child,
        ),
        relation(
            r"\b{name}\s+(?i:is)\s+(?i:my|our)\s+{order}(?P<rel>(?i:{child}))(?P<poss>['\x{2019}]s)?\b",
            PersonKind::Child,
        ),
        relation(
            r"\b{name},\s+(?i:my|our)\s+{order}(?P<rel>(?i:{child}))\s*(?:[,.!?;)]|$)",
            PersonKind::Child,
        ),
        relation(
            r"\b(?i:my|our)\s+(?P<rel>(?i:{spouse}))(?:'s\s+name\s+is|,|\s+(?i:named|called))?\s+{name}\b",
            PersonKind::Spouse,
        ),
        relation(
            r"\b{name}\s+(?i:is)\s+(?i:my)\s+(?P<rel>(?i:{spouse}))(?P<poss>['\x{2019}]s)?\b",
            PersonKind::Spouse,
        ),
        relation(
            r"\b{name},\s+(?i:my)\s+(?P<rel>(?i:{spouse}))\s*(?:[,.!?;)]|$)",
            PersonKind::Spouse,
        ),
        relation(
            r"\b(?i:my|our)\s+(?P<rel>(?i:{relative}))(?:'s\s+name\s+is|,|\s+(?i:named|called))?\s+{name}\b",
            PersonKind::Relative,
        ),
        relation(
            r"\b{name}\s+(?i:is)\s+(?i:my)\s+(?P<rel>(?i:{relative}))(?P<poss>['\x{2019}]s)?\b",
            PersonKind::Relative,
        ),
        relation(
            r"\b{name},\s+(?i:my)\s+(?P<rel>(?i:{relative}))\s*(?:[,.!?;)]|$)",
            PersonKind::Relative,
        ),
        relation(r"\b(?i:my\s+name\s+is|call\s+me)\s+{name}\b", PersonKind::User),
    ]
});

/// "my kids Sam and Ava"
static SIBLING_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?i:my|our)\s+(?i:kids|children|sons|daughters|boys|girls|twins),?\s+(?P<first>[A-Z][a-z]+)\s*(?:,|and|&)\s*(?P<second>[A-Z][a-z]+)\b",
    )
    .expect("valid regex")
});

/// Template scoped to one person; `{n}` marks where the name goes
struct AttributeTemplate {
    template: &'static str,
    child_only: bool,
}

const AGE_TEMPLATES: &[AttributeTemplate] = &[
    AttributeTemplate {
        template: r"\b{n}(?:\s+(?i:is|was|turned|just\s+turned|will\s+be|turns)|'s)\s+(?P<value>\d{1,3})\b(?:\s*(?i:years?|yrs?)(?:\s*(?i:old))?|\s*(?i:yo))?",
        child_only: false,
    },
    AttributeTemplate {
        template: r"\b{n},?\s+(?i:who\s+is|who's|aged?)\s+(?P<value>\d{1,3})\b",
        child_only: false,
    },
    AttributeTemplate {
        template: r"\b{n}\s*\((?P<value>\d{1,2})\)",
        child_only: true,
    },
    AttributeTemplate {
        template: r"\b(?P<value>\d{1,2})[- ](?i:year|yr)s?[- ](?i:old)\s+(?i:son|daughter|child|kid|boy|girl|stepson|stepdaughter),?\s+{n}\b",
        child_only: true,
    },
    AttributeTemplate {
        template: r"\b{n}\s+(?i:is)\s+(?i:only|almost|nearly|about|barely)\s+(?P<value>\d{1,2})\b",
        child_only: true,
    },
];

const PRONOUN_AGE_TEMPLATE: AttributeTemplate = AttributeTemplate {
    template: r"\b(?i:he|she|they)(?:\s+(?i:is|are|just\s+turned|turned)|'s|'re)\s+(?P<value>\d{1,2})\b(?:\s*(?i:years?|yrs?)(?:\s*(?i:old))?)?",
    child_only: true,
};

const GRADE_TEMPLATES: &[AttributeTemplate] = &[
    AttributeTemplate {
        template: r"\b{n}(?:\s+(?i:is)|'s)\s+(?i:in)\s+(?P<value>\d{1,2}(?i:st|nd|rd|th)\s+(?i:grade))\b",
        child_only: true,
    },
    AttributeTemplate {
        template: r"\b{n}(?:\s+(?i:is)|'s)\s+(?i:in)\s+(?P<value>(?i:kindergarten|pre-?k|preschool|first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth|eleventh|twelfth)(?:\s+(?i:grade))?)\b",
        child_only: true,
    },
    AttributeTemplate {
        template: r"\b{n}(?:\s+(?i:is)|'s)\s+(?i:a)\s+(?P<value>(?i:freshman|sophomore|junior|senior))\b",
        child_only: true,
    },
    AttributeTemplate {
        template: r"\b{n}\s+(?:(?i:is)\s+)?(?i:starting|entering|finishing|repeating)\s+(?P<value>\d{1,2}(?i:st|nd|rd|th)\s+(?i:grade)|(?i:kindergarten))\b",
        child_only: true,
    },
];

const PRONOUN_GRADE_TEMPLATE: AttributeTemplate = AttributeTemplate {
    template: r"\b(?i:he|she|they)(?:\s+(?i:is|are)|'s|'re)\s+(?i:in)\s+(?P<value>\d{1,2}(?i:st|nd|rd|th)\s+(?i:grade)|(?i:kindergarten|preschool))\b",
    child_only: true,
};

const SCHOOL_NAME: &str = r"(?P<value>(?:[A-Z][\w'.-]*\s+){0,4}(?:Elementary|Middle|High|Academy|School|Preschool|Montessori|Prep|Charter|Day School)(?:\s+School)?)";

const SCHOOL_TEMPLATES: &[AttributeTemplate] = &[
    AttributeTemplate {
        template: r"\b{n}\s+(?i:goes|go|went)\s+(?i:to)\s+{school}",
        child_only: false,
    },
    AttributeTemplate {
        template: r"\b{n}\s+(?i:attends|is\s+enrolled\s+at|is\s+at|started\s+at|transferred\s+to)\s+{school}",
        child_only: false,
    },
    AttributeTemplate {
        template: r"\b{n}(?:'s|\s+(?i:is))\s+(?:(?i:a)\s+)?(?i:student)\s+(?i:at)\s+{school}",
        child_only: false,
    },
    AttributeTemplate {
        template: r"\b{n}\b[^.!?;\n]{0,60}?\s(?i:goes\s+to|attends)\s+{school}",
        child_only: false,
    },
];

const PRONOUN_SCHOOL_TEMPLATE: AttributeTemplate = AttributeTemplate {
    template: r"\b(?i:he|she|they)\s+(?i:goes\s+to|go\s+to|attends|is\s+enrolled\s+at)\s+{school}",
    child_only: false,
};

/// Stand-in for the person in attribute templates; the captured text is
/// compared against the wanted name after matching
const WHO: &str = r"(?P<who>\p{Lu}\p{Ll}*(?:-\p{Lu}\p{Ll}*)?(?:\s+\p{Lu}\p{Ll}*(?:-\p{Lu}\p{Ll}*)?){0,2})";

/// An attribute template compiled once for every name
struct AttributePattern {
    regex: Regex,
    child_only: bool,
}

impl AttributePattern {
    fn compile(template: &AttributeTemplate) -> Self {
        let pattern = template
            .template
            .replace("{school}", SCHOOL_NAME)
            .replace("{n}", WHO);
        Self {
            regex: Regex::new(&pattern).expect("valid regex"),
            child_only: template.child_only,
        }
    }

    /// First match about `name` (or any match, for pronoun patterns) that
    /// `accept` turns into a value
    fn find_for<T>(
        &self,
        text: &str,
        name: Option<&str>,
        mut accept: impl FnMut(&Captures<'_>) -> Option<T>,
    ) -> Option<T> {
        let mut start = 0;
        while start <= text.len() {
            let caps = self.regex.captures_at(text, start)?;
            let whole = caps.get(0)?;
            match caps.name("who") {
                Some(who) => {
                    if Some(who.as_str()) == name {
                        if let Some(value) = accept(&caps) {
                            return Some(value);
                        }
                    }
                    // retry from the next word so a shorter or later name can match
                    start = who.start() + who.as_str().chars().next().map_or(1, char::len_utf8);
                }
                None => {
                    if let Some(value) = accept(&caps) {
                        return Some(value);
                    }
                    if whole.end() == whole.start() {
                        return None;
                    }
                    start = whole.end();
                }
            }
        }
        None
    }
}

fn compile_all(templates: &[AttributeTemplate]) -> Vec<AttributePattern> {
    templates.iter().map(AttributePattern::compile).collect()
}

static AGE_PATTERNS: Lazy<Vec<AttributePattern>> = Lazy::new(|| compile_all(AGE_TEMPLATES));
static GRADE_PATTERNS: Lazy<Vec<AttributePattern>> = Lazy::new(|| compile_all(GRADE_TEMPLATES));
static SCHOOL_PATTERNS: Lazy<Vec<AttributePattern>> =
    Lazy::new(|| compile_all(SCHOOL_TEMPLATES));
static PRONOUN_AGE: Lazy<AttributePattern> =
    Lazy::new(|| AttributePattern::compile(&PRONOUN_AGE_TEMPLATE));
static PRONOUN_GRADE: Lazy<AttributePattern> =
    Lazy::new(|| AttributePattern::compile(&PRONOUN_GRADE_TEMPLATE));
static PRONOUN_SCHOOL: Lazy<AttributePattern> =
    Lazy::new(|| AttributePattern::compile(&PRONOUN_SCHOOL_TEMPLATE));

/// Words after a number that mean it is not an age
const NON_AGE_UNITS: &[&str] = &[
    "minute", "hour", "day", "week", "month", "inch", "feet", "foot", "pound", "lb", "kg",
    "cm", "%", "percent", "time", "point", "dollar", "o'clock", "am", "pm", ":",
];

/// Diagnosis dictionary: label, case-insensitive phrases, case-sensitive acronyms
const DIAGNOSES: &[(&str, &[&str], &[&str])] = &[
    (
        "ADHD",
        &["adhd", "attention deficit", "attention-deficit"],
        &["ADD"],
    ),
    (
        "Autism Spectrum Disorder",
        &["autism", "autistic", "asperger", "on the spectrum"],
        &["ASD"],
    ),
    (
        "Anxiety Disorder",
        &["anxiety disorder", "generalized anxiety", "social anxiety", "anxiety"],
        &["GAD"],
    ),
    (
        "Oppositional Defiant Disorder",
        &["oppositional defiant", "oppositional-defiant"],
        &["ODD"],
    ),
];

/// Phrases that negate a diagnosis mention in the same sentence
const DIAGNOSIS_NEGATIONS: &[&str] = &[
    "doesn't have",
    "does not have",
    "don't think",
    "do not think",
    "ruled out",
    "not diagnosed",
    "isn't autistic",
    "is not autistic",
];

static GENERIC_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:he|she|they|him|her|his|hers|them|their|(?:my|our)\s+(?:child|son|daughter|kid|boy|girl|little\s+one))\b",
    )
    .expect("valid regex")
});

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?;\n]+").expect("valid regex"));

static ACRONYM_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DIAGNOSES
        .iter()
        .flat_map(|(label, _, acronyms)| {
            acronyms.iter().map(move |acronym| {
                (
                    *label,
                    Regex::new(&format!(r"\b{}\b", acronym)).expect("valid regex"),
                )
            })
        })
        .collect()
});

// =============================================================================
// Helper Functions
// =============================================================================

/// True when `word` occurs in `text` as a whole word (case-sensitive)
pub fn mentions_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(start, _)| {
        let end = start + word.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        let after_ok = text[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        before_ok && after_ok
    })
}

/// True when the text refers to someone by pronoun or "my child"
pub fn has_generic_reference(text: &str) -> bool {
    GENERIC_REFERENCE.is_match(text)
}

fn gender_for(rel_word: &str) -> Option<Gender> {
    match rel_word.to_lowercase().as_str() {
        "son" | "boy" | "stepson" | "husband" | "fiance" | "father" | "dad" | "brother"
        | "grandfather" | "grandpa" | "uncle" | "stepdad" => Some(Gender::Male),
        "daughter" | "girl" | "stepdaughter" | "wife" | "fiancee" | "mother" | "mom"
        | "sister" | "grandmother" | "grandma" | "aunt" | "stepmom" => Some(Gender::Female),
        _ => None,
    }
}

fn followed_by_unit(rest: &str) -> bool {
    let rest = rest.trim_start().to_lowercase();
    NON_AGE_UNITS.iter().any(|unit| rest.starts_with(unit))
}

// =============================================================================
// Extraction Engine
// =============================================================================

/// Rule-based family entity extractor
pub struct FamilyExtractor {
    config: ExtractionConfig,
}

impl FamilyExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Is `token` acceptable as a person's name?
    pub fn is_valid_name(&self, token: &str) -> bool {
        token.len() >= 2
            && token.len() <= 20
            && NAME_SHAPE.is_match(token)
            && !STOP_WORDS.contains(token)
            && !self.config.extra_stop_words.iter().any(|w| w == token)
    }

    /// Extract family facts from a message.
    ///
    /// `known_names` are names that already have profiles; they are matched
    /// as whole words and used to resolve pronoun references.
    pub fn extract(&self, message: &str, known_names: &BTreeSet<String>) -> FamilyExtraction {
        let mut result = FamilyExtraction::default();
        if message.trim().is_empty() {
            return result;
        }

        self.extract_relations(message, &mut result);

        // People this message talks about, detected or already known
        let mut mentioned: Vec<String> = result
            .children
            .iter()
            .chain(result.adults.iter())
            .cloned()
            .collect();
        for known in known_names {
            if !mentioned.contains(known) && mentions_word(message, known) {
                mentioned.push(known.clone());
            }
        }

        let subject = match mentioned.len() {
            1 => Some(mentioned[0].clone()),
            0 if known_names.len() == 1 => known_names.iter().next().cloned(),
            _ => None,
        };

        for name in &mentioned {
            self.extract_ages(message, name, &mut result);
            extract_attribute(message, name, &GRADE_PATTERNS, &mut result.grades);
            extract_attribute(message, name, &SCHOOL_PATTERNS, &mut result.schools);
        }

        if let Some(subject) = &subject {
            if !result.ages.contains_key(subject) {
                if let Some(age) = self.match_age(message, &PRONOUN_AGE, None) {
                    result.ages.insert(subject.clone(), age);
                }
            }
            if !result.grades.contains_key(subject) {
                if let Some(grade) = match_value(message, &PRONOUN_GRADE, None) {
                    result.grades.insert(subject.clone(), grade);
                }
            }
            if !result.schools.contains_key(subject) {
                if let Some(school) = match_value(message, &PRONOUN_SCHOOL, None) {
                    result.schools.insert(subject.clone(), school);
                }
            }
        }

        self.extract_diagnoses(message, &mentioned, subject.as_deref(), &mut result);

        debug!(
            children = result.children.len(),
            adults = result.adults.len(),
            ages = result.ages.len(),
            diagnoses = result.diagnoses.len(),
            "Family extraction complete"
        );

        result
    }

    fn record_person(
        &self,
        result: &mut FamilyExtraction,
        name: &str,
        kind: PersonKind,
        rel_word: Option<&str>,
    ) {
        if !self.is_valid_name(name) || result.relationships.contains_key(name) {
            return;
        }
        result
            .relationships
            .insert(name.to_string(), kind.relationship());
        if kind == PersonKind::Child {
            result.children.push(name.to_string());
        } else {
            result.adults.push(name.to_string());
        }
        if let Some(gender) = rel_word.and_then(gender_for) {
            result.genders.insert(name.to_string(), gender);
        }
    }

    fn extract_relations(&self, message: &str, result: &mut FamilyExtraction) {
        for template in RELATION_TEMPLATES.iter() {
            for caps in template.pattern.captures_iter(message) {
                let Some(name) = caps.name("name").map(|m| m.as_str()) else {
                    continue;
                };
                if caps.name("poss").is_some() {
                    continue;
                }
                let rel_word = caps.name("rel").map(|m| m.as_str());
                self.record_person(result, name, template.kind, rel_word);

                if let Some(age) = caps.name("age").and_then(|m| m.as_str().parse::<u8>().ok())
                {
                    if result.relationships.contains_key(name)
                        && !result.ages.contains_key(name)
                        && age > 0
                        && age <= self.config.max_child_age
                    {
                        result.ages.insert(name.to_string(), age);
                    }
                }
            }
        }

        for caps in SIBLING_PAIR.captures_iter(message) {
            for group in ["first", "second"] {
                if let Some(name) = caps.name(group) {
                    self.record_person(result, name.as_str(), PersonKind::Child, None);
                }
            }
        }
    }

    fn match_age(&self, message: &str, pattern: &AttributePattern, name: Option<&str>) -> Option<u8> {
        let max = if pattern.child_only {
            self.config.max_child_age
        } else {
            self.config.max_general_age
        };

        pattern.find_for(message, name, |caps| {
            let value = caps.name("value")?;
            if followed_by_unit(&message[value.end()..]) {
                return None;
            }
            let age = value.as_str().parse::<u16>().ok()?;
            (age > 0 && age <= max as u16).then_some(age as u8)
        })
    }

    fn extract_ages(&self, message: &str, name: &str, result: &mut FamilyExtraction) {
        if result.ages.contains_key(name) {
            return;
        }
        let is_adult = matches!(
            result.relationships.get(name),
            Some(Relationship::Spouse) | Some(Relationship::User)
        );
        for pattern in AGE_PATTERNS.iter() {
            if pattern.child_only && is_adult {
                continue;
            }
            if let Some(age) = self.match_age(message, pattern, Some(name)) {
                result.ages.insert(name.to_string(), age);
                return;
            }
        }
    }

    fn extract_diagnoses(
        &self,
        message: &str,
        mentioned: &[String],
        subject: Option<&str>,
        result: &mut FamilyExtraction,
    ) {
        for sentence in SENTENCE_SPLIT.split(message) {
            let labels = diagnosis_labels(sentence);
            if labels.is_empty() {
                continue;
            }

            let mut targets: Vec<&str> = mentioned
                .iter()
                .map(|n| n.as_str())
                .filter(|n| mentions_word(sentence, n))
                .collect();
            // co-occurrence is judged over the whole message
            if targets.is_empty() {
                if let Some(subject) = subject {
                    if mentions_word(message, subject) || has_generic_reference(message) {
                        targets.push(subject);
                    }
                }
            }

            for target in targets {
                let entry = result.diagnoses.entry(target.to_string()).or_default();
                for label in &labels {
                    if !entry.iter().any(|l| l == label) {
                        entry.push(label.to_string());
                    }
                }
            }
        }
    }
}

impl Default for FamilyExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

fn match_value(message: &str, pattern: &AttributePattern, name: Option<&str>) -> Option<String> {
    pattern.find_for(message, name, |caps| {
        caps.name("value")
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn extract_attribute(
    message: &str,
    name: &str,
    patterns: &[AttributePattern],
    target: &mut BTreeMap<String, String>,
) {
    if target.contains_key(name) {
        return;
    }
    if let Some(value) = patterns
        .iter()
        .find_map(|pattern| match_value(message, pattern, Some(name)))
    {
        target.insert(name.to_string(), value);
    }
}

/// Diagnosis labels named in one sentence, unless the sentence negates them
fn diagnosis_labels(sentence: &str) -> Vec<&'static str> {
    let lower = sentence.to_lowercase();
    if DIAGNOSIS_NEGATIONS.iter().any(|neg| lower.contains(neg)) {
        return Vec::new();
    }

    let mut labels = Vec::new();
    for (label, phrases, _) in DIAGNOSES {
        if phrases.iter().any(|phrase| lower.contains(phrase)) && !labels.contains(label) {
            labels.push(*label);
        }
    }
    for (label, pattern) in ACRONYM_PATTERNS.iter() {
        if pattern.is_match(sentence) && !labels.contains(label) {
            labels.push(*label);
        }
    }
    labels
}

// =============================================================================
// Tests
// =============================================================================
