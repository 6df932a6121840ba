//! Read-only exhibit catalogue.
//!
//! Guides walk the catalogue in order; nothing in the engine mutates it.

use serde::{Deserialize, Serialize};

/// One painting on the tour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exhibit {
    pub id: u32,
    pub name: String,
    pub artist: String,
    pub year: String,
    pub style: String,
    pub description: String,
    /// What the guide says in front of the painting.
    pub explanation: String,
    pub dimensions: String,
    /// Room the painting hangs in.
    pub location: String,
}

/// Source of the ordered exhibit sequence.
pub trait ExhibitCatalogue: Send + Sync {
    fn list_exhibits(&self) -> &[Exhibit];
}

/// Catalogue backed by an in-memory list.
#[derive(Debug, Clone)]
pub struct StaticCatalogue {
    exhibits: Vec<Exhibit>,
}

impl StaticCatalogue {
    pub fn new(exhibits: Vec<Exhibit>) -> Self {
        Self { exhibits }
    }

    /// The default collection, truncated to `limit` exhibits.
    pub fn with_limit(limit: usize) -> Self {
        let mut catalogue = Self::default();
        catalogue.exhibits.truncate(limit);
        catalogue
    }

    pub fn len(&self) -> usize {
        self.exhibits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exhibits.is_empty()
    }
}

impl ExhibitCatalogue for StaticCatalogue {
    fn list_exhibits(&self) -> &[Exhibit] {
        &self.exhibits
    }
}

#[allow(clippy::too_many_arguments)]
fn exhibit(
    id: u32,
    name: &str,
    artist: &str,
    year: &str,
    style: &str,
    description: &str,
    explanation: &str,
    dimensions: &str,
    location: &str,
) -> Exhibit {
    Exhibit {
        id,
        name: name.to_string(),
        artist: artist.to_string(),
        year: year.to_string(),
        style: style.to_string(),
        description: description.to_string(),
        explanation: explanation.to_string(),
        dimensions: dimensions.to_string(),
        location: location.to_string(),
    }
}

impl Default for StaticCatalogue {
    fn default() -> Self {
        Self::new(vec![
            exhibit(
                1,
                "La Joconde",
                "Léonard de Vinci",
                "1503-1519",
                "Renaissance",
                "Portrait of Lisa Gherardini on poplar panel.",
                "Note the sfumato: no hard outlines, only soft transitions of tone.",
                "77 x 53 cm",
                "Salle des États",
            ),
            exhibit(
                2,
                "Les Noces de Cana",
                "Paolo Véronèse",
                "1563",
                "Renaissance vénitienne",
                "The largest painting in the collection, a wedding feast.",
                "Over a hundred figures; the musicians in front are painters of the time.",
                "677 x 994 cm",
                "Salle des États",
            ),
            exhibit(
                3,
                "La Liberté guidant le peuple",
                "Eugène Delacroix",
                "1830",
                "Romantisme",
                "Allegory of the July Revolution.",
                "Liberty is both a woman of the people and a goddess; follow the flag's diagonal.",
                "260 x 325 cm",
                "Salle Mollien",
            ),
            exhibit(
                4,
                "Le Radeau de La Méduse",
                "Théodore Géricault",
                "1818-1819",
                "Romantisme",
                "Survivors of the frigate Méduse adrift at sea.",
                "Two pyramids of bodies lead the eye from despair to the distant ship.",
                "491 x 716 cm",
                "Salle Mollien",
            ),
            exhibit(
                5,
                "Le Sacre de Napoléon",
                "Jacques-Louis David",
                "1805-1807",
                "Néoclassicisme",
                "Coronation of Joséphine at Notre-Dame.",
                "Napoléon's mother sits in the box although she never attended.",
                "621 x 979 cm",
                "Salle Daru",
            ),
            exhibit(
                6,
                "La Dentellière",
                "Johannes Vermeer",
                "1669-1670",
                "Siècle d'or néerlandais",
                "A young woman absorbed in making bobbin lace.",
                "The smallest Vermeer; only the threads at the centre are in focus.",
                "24 x 21 cm",
                "Aile Richelieu",
            ),
            exhibit(
                7,
                "Le Tricheur à l'as de carreau",
                "Georges de La Tour",
                "vers 1635",
                "Caravagisme",
                "A young man fleeced at cards.",
                "Read the scene through the glances: every eye betrays the plot.",
                "106 x 146 cm",
                "Aile Sully",
            ),
            exhibit(
                8,
                "La Grande Odalisque",
                "Jean-Auguste-Dominique Ingres",
                "1814",
                "Néoclassicisme",
                "A reclining concubine seen from behind.",
                "Her back has three vertebrae too many; Ingres chose line over anatomy.",
                "91 x 162 cm",
                "Salle Denon",
            ),
        ])
    }
}
