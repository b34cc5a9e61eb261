use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Identity of one catalog item.
///
/// Carries the logical group it belongs to and its fixed file name. The
/// engine never looks inside beyond equality and hashing; applications map
/// it back to their own item type with [`CatalogItem::from_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    group: Arc<str>,
    file_name: Arc<str>,
}

impl ItemId {
    pub fn new(group: impl Into<Arc<str>>, file_name: impl Into<Arc<str>>) -> Self {
        Self {
            group: group.into(),
            file_name: file_name.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.file_name)
    }
}

/// A logical group of documents mirrored from one remote folder.
pub trait CatalogDescriptor: Send + Sync {
    /// Remote folder holding every item of the catalog (e.g. `/JSONs`).
    fn folder_path(&self) -> &str;

    /// The finite, ordered set of items in the catalog.
    fn items(&self) -> Vec<ItemId>;
}

/// An application-defined item type, usually a fieldless enum.
///
/// ```ignore
/// #[derive(Clone, Copy, PartialEq, Eq)]
/// enum Content { Genres, Languages }
///
/// impl CatalogItem for Content {
///     const GROUP: &'static str = "content";
///     const FOLDER_PATH: &'static str = "/JSONs";
///     fn all() -> &'static [Self] { &[Content::Genres, Content::Languages] }
///     fn file_name(&self) -> &'static str {
///         match self {
///             Content::Genres => "genres.json",
///             Content::Languages => "languages.json",
///         }
///     }
/// }
/// ```
pub trait CatalogItem: Copy + Eq + Send + Sync + 'static {
    const GROUP: &'static str;
    const FOLDER_PATH: &'static str;

    fn all() -> &'static [Self];

    fn file_name(&self) -> &'static str;

    fn id(&self) -> ItemId {
        ItemId::new(Self::GROUP, self.file_name())
    }

    fn from_id(id: &ItemId) -> Option<Self> {
        if id.group() != Self::GROUP {
            return None;
        }
        Self::all()
            .iter()
            .copied()
            .find(|item| item.file_name() == id.file_name())
    }
}

/// Catalog descriptor derived from a [`CatalogItem`] type.
pub struct TypedCatalog<I>(PhantomData<fn() -> I>);

impl<I: CatalogItem> TypedCatalog<I> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<I: CatalogItem> Default for TypedCatalog<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: CatalogItem> CatalogDescriptor for TypedCatalog<I> {
    fn folder_path(&self) -> &str {
        I::FOLDER_PATH
    }

    fn items(&self) -> Vec<ItemId> {
        I::all().iter().map(CatalogItem::id).collect()
    }
}

/// Catalog assembled at runtime, e.g. from command-line arguments.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    group: Arc<str>,
    folder_path: String,
    items: Vec<ItemId>,
}

impl StaticCatalog {
    pub fn new(group: impl Into<Arc<str>>, folder_path: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            folder_path: folder_path.into(),
            items: Vec::new(),
        }
    }

    /// Add an item; duplicate file names are ignored.
    pub fn with_item(mut self, file_name: &str) -> Self {
        if self.item(file_name).is_none() {
            self.items.push(ItemId::new(self.group.clone(), file_name));
        }
        self
    }

    pub fn item(&self, file_name: &str) -> Option<ItemId> {
        self.items
            .iter()
            .find(|id| id.file_name() == file_name)
            .cloned()
    }
}

impl CatalogDescriptor for StaticCatalog {
    fn folder_path(&self) -> &str {
        &self.folder_path
    }

    fn items(&self) -> Vec<ItemId> {
        self.items.clone()
    }
}
