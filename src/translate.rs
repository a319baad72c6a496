use std::collections::hash_map::Entry;
use std::collections::HashMap;

use uuid::Uuid;

use crate::catalog::{Catalogs, Role};

/// Folds the accented Latin range that actually occurs in the source data.
/// Anything else passes through unchanged.
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'a',
        'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        _ => c,
    }
}

fn slug_joined(s: &str, sep: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.trim().chars() {
        let c = fold_char(c);
        if c.is_whitespace() {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push(sep);
            pending_sep = false;
        }
        for lc in c.to_lowercase() {
            out.push(lc);
        }
    }
    out
}

/// Accent-stripped, lowercase, whitespace collapsed to single spaces.
pub fn slug(s: &str) -> String {
    slug_joined(s, ' ')
}

/// Same normalization with underscores. Legacy exports used both separators,
/// so both forms are registered as aliases for the same canonical id.
pub fn slug_underscore(s: &str) -> String {
    slug_joined(s, '_')
}

/// National ids arrive dotted ("12.345.678-9") or bare; compare without
/// dots/spaces and case-insensitively (the check digit may be K or k).
pub fn national_id_key(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

enum NameHit {
    One(Uuid),
    Ambiguous,
}

/// Read-only lookup maps between the identifier schemes the storage tiers
/// historically used: national id / username for people, human name or slug
/// for courses, bare letter within a course for sections. Built once per
/// import run from the catalog snapshot and never mutated afterwards.
pub struct Translator {
    national_id_to_person: HashMap<String, Uuid>,
    username_to_person: HashMap<String, Uuid>,
    course_key_to_id: HashMap<String, Uuid>,
    section_key_to_id: HashMap<String, Uuid>,
    name_in_section_to_person: HashMap<(Uuid, String), NameHit>,
}

impl Translator {
    pub fn build(catalogs: &Catalogs) -> Translator {
        let mut national_id_to_person = HashMap::new();
        let mut username_to_person = HashMap::new();
        for p in &catalogs.people {
            if let Some(nid) = p.national_id.as_deref() {
                let key = national_id_key(nid);
                if !key.is_empty() {
                    national_id_to_person.insert(key, p.id);
                }
            }
            if let Some(u) = p.username.as_deref() {
                let key = u.trim().to_lowercase();
                if !key.is_empty() {
                    username_to_person.insert(key, p.id);
                }
            }
        }

        // Each course is reachable by UUID and by both slug forms of its name.
        let mut course_key_to_id = HashMap::new();
        let mut keys_by_course: HashMap<Uuid, Vec<String>> = HashMap::new();
        for c in &catalogs.courses {
            let keys = vec![
                c.id.to_string(),
                slug(&c.name),
                slug_underscore(&c.name),
            ];
            for k in &keys {
                course_key_to_id.insert(k.clone(), c.id);
            }
            keys_by_course.insert(c.id, keys);
        }

        // Section keys compose as courseKey|letter, inserted under every key
        // of the owning course so resolution works from whichever course
        // representation the caller has on hand.
        let mut section_key_to_id = HashMap::new();
        for s in &catalogs.sections {
            let letter = slug(&s.name);
            if let Some(course_keys) = keys_by_course.get(&s.course_id) {
                for ck in course_keys {
                    section_key_to_id.insert(format!("{}|{}", ck, letter), s.id);
                }
            }
        }

        // Roster-context fallback: students reachable by display name within
        // a section they are enrolled in. Two enrollees with the same
        // normalized name make that name unresolvable on purpose.
        let mut person_by_id = HashMap::new();
        for p in &catalogs.people {
            person_by_id.insert(p.id, p);
        }
        let mut name_in_section_to_person: HashMap<(Uuid, String), NameHit> = HashMap::new();
        for e in &catalogs.enrollments {
            let Some(p) = person_by_id.get(&e.student_id) else {
                continue;
            };
            if p.role != Role::Student {
                continue;
            }
            let key = (e.section_id, slug(&p.display_name));
            match name_in_section_to_person.entry(key) {
                Entry::Occupied(mut o) => {
                    let clash = matches!(o.get(), NameHit::One(existing) if *existing != p.id);
                    if clash {
                        o.insert(NameHit::Ambiguous);
                    }
                }
                Entry::Vacant(v) => {
                    v.insert(NameHit::One(p.id));
                }
            }
        }

        Translator {
            national_id_to_person,
            username_to_person,
            course_key_to_id,
            section_key_to_id,
            name_in_section_to_person,
        }
    }

    pub fn resolve_person(
        &self,
        national_id: Option<&str>,
        username: Option<&str>,
    ) -> Option<Uuid> {
        if let Some(nid) = national_id {
            let key = national_id_key(nid);
            if let Some(id) = self.national_id_to_person.get(&key) {
                return Some(*id);
            }
        }
        if let Some(u) = username {
            let key = u.trim().to_lowercase();
            if let Some(id) = self.username_to_person.get(&key) {
                return Some(*id);
            }
        }
        None
    }

    pub fn resolve_person_in_section(&self, display_name: &str, section_id: Uuid) -> Option<Uuid> {
        match self
            .name_in_section_to_person
            .get(&(section_id, slug(display_name)))
        {
            Some(NameHit::One(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn resolve_course(&self, name_or_slug: &str) -> Option<Uuid> {
        let raw = name_or_slug.trim();
        if let Some(id) = self.course_key_to_id.get(raw) {
            return Some(*id);
        }
        self.course_key_to_id.get(&slug(raw)).copied().or_else(|| {
            self.course_key_to_id.get(&slug_underscore(raw)).copied()
        })
    }

    pub fn resolve_section(&self, course_ref: &str, letter: &str) -> Option<Uuid> {
        let letter = slug(letter);
        let raw = course_ref.trim();
        for ck in [raw.to_string(), slug(raw), slug_underscore(raw)] {
            if let Some(id) = self.section_key_to_id.get(&format!("{}|{}", ck, letter)) {
                return Some(*id);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Course, Enrollment, Person, Section};

    fn sample_catalogs() -> Catalogs {
        let course_id = Uuid::new_v4();
        let section_id = Uuid::new_v4();
        let ana = Uuid::new_v4();
        Catalogs {
            courses: vec![Course {
                id: course_id,
                name: "1ro Básico".into(),
            }],
            sections: vec![Section {
                id: section_id,
                course_id,
                name: "A".into(),
            }],
            people: vec![Person {
                id: ana,
                national_id: Some("12.345.678-9".into()),
                username: Some("ana.rojas".into()),
                display_name: "Ana Rojas".into(),
                role: Role::Student,
            }],
            enrollments: vec![Enrollment {
                student_id: ana,
                course_id,
                section_id,
            }],
        }
    }

    #[test]
    fn slug_strips_accents_and_collapses_whitespace() {
        assert_eq!(slug("  Historia,   Geografía y Ciencias Sociales "), "historia, geografia y ciencias sociales");
        assert_eq!(slug_underscore("1ro Básico"), "1ro_basico");
        assert_eq!(slug("Matemáticas"), "matematicas");
    }

    #[test]
    fn course_resolves_by_name_slug_and_uuid() {
        let c = sample_catalogs();
        let t = Translator::build(&c);
        let id = c.courses[0].id;
        assert_eq!(t.resolve_course("1ro Básico"), Some(id));
        assert_eq!(t.resolve_course("1ro basico"), Some(id));
        assert_eq!(t.resolve_course("1ro_basico"), Some(id));
        assert_eq!(t.resolve_course(&id.to_string()), Some(id));
        assert_eq!(t.resolve_course("2do Básico"), None);
    }

    #[test]
    fn section_resolution_is_symmetric_across_course_keys() {
        let c = sample_catalogs();
        let t = Translator::build(&c);
        let course_id = c.courses[0].id;
        let section_id = c.sections[0].id;
        let via_uuid = t.resolve_section(&course_id.to_string(), "A");
        let via_slug = t.resolve_section("1ro básico", "a");
        let via_underscore = t.resolve_section("1ro_basico", "A");
        assert_eq!(via_uuid, Some(section_id));
        assert_eq!(via_slug, via_uuid);
        assert_eq!(via_underscore, via_uuid);
        assert_eq!(t.resolve_section("1ro basico", "B"), None);
    }

    #[test]
    fn person_resolves_by_dotted_or_bare_national_id() {
        let c = sample_catalogs();
        let t = Translator::build(&c);
        let ana = c.people[0].id;
        assert_eq!(t.resolve_person(Some("12.345.678-9"), None), Some(ana));
        assert_eq!(t.resolve_person(Some("12345678-9"), None), Some(ana));
        // Single ambiguous column: the same raw value is tried as username too.
        assert_eq!(t.resolve_person(Some("ana.rojas"), Some("ana.rojas")), Some(ana));
        assert_eq!(t.resolve_person(Some("99.999.999-9"), Some("nadie")), None);
    }

    #[test]
    fn name_fallback_is_scoped_to_section_and_rejects_ambiguity() {
        let mut c = sample_catalogs();
        let section_id = c.sections[0].id;
        let ana = c.people[0].id;
        let t = Translator::build(&c);
        assert_eq!(t.resolve_person_in_section("ana rojas", section_id), Some(ana));
        assert_eq!(t.resolve_person_in_section("Ana Rojas", Uuid::new_v4()), None);

        // A second enrolled "Ana Rojas" poisons the name key.
        let twin = Uuid::new_v4();
        c.people.push(Person {
            id: twin,
            national_id: Some("7-7".into()),
            username: None,
            display_name: "Ana  Rojas".into(),
            role: Role::Student,
        });
        c.enrollments.push(Enrollment {
            student_id: twin,
            course_id: c.courses[0].id,
            section_id,
        });
        let t = Translator::build(&c);
        assert_eq!(t.resolve_person_in_section("Ana Rojas", section_id), None);
    }
}
