//! Procedural macros for the `querymap` repository library.
//!
//! This crate provides two main macros:
//! - `#[derive(Entity)]`: A derive macro that inspects a struct and generates all the
//!   necessary metadata and a default `RowAdapter` implementation for it to be used
//!   in a repository.
//! - `#[repository(...)]`: An attribute macro that wraps any backend repository for an
//!   entity and adds typed `find_by_<field>` / `find_one_by_<field>` finders.

use proc_macro::TokenStream;
use quote::{quote, ToTokens};
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
    spanned::Spanned,
    Data, DeriveInput, Fields, Ident, ItemMod, LitStr, Token, Type, TypePath,
};

use inflections::Inflect;

// --- Helper Structs & Functions for Parsing ---

/// A helper struct for parsing `key = "value"` style meta attributes.
struct MetaNameValue {
    pub path: syn::Path,
    pub _eq_token: Token![=],
    pub value: LitStr,
}

impl Parse for MetaNameValue {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        Ok(Self {
            path: input.parse()?,
            _eq_token: input.parse()?,
            value: input.parse()?,
        })
    }
}

/// Helper to check if a type is an `Option<T>`.
fn is_option(ty: &Type) -> bool {
    get_option_inner(ty).is_some()
}

/// Helper to get the inner type of an `Option<T>`.
fn get_option_inner(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        if type_path.qself.is_some() {
            return None;
        }
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident != "Option" {
                return None;
            }
            if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(syn::GenericArgument::Type(inner_ty)) = args.args.first() {
                    return Some(inner_ty);
                }
            }
        }
    }
    None
}

fn is_valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

/// Holds parsed metadata about a single struct field.
#[derive(Clone)]
struct FieldMetadata {
    ident: Ident,
    ty: Type,
    ty_str: String,
    column_name: String,
    is_id: bool,
    is_skipped: bool,
}

/// Parses all named fields from a `DeriveInput` struct.
fn parse_field_metadata(input: &DeriveInput) -> syn::Result<Vec<FieldMetadata>> {
    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => named,
            _ => {
                return Err(syn::Error::new(
                    input.ident.span(),
                    "#[derive(Entity)] only supports structs with named fields.",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.ident.span(),
                "#[derive(Entity)] can only be used on structs.",
            ))
        }
    };

    let mut out = Vec::with_capacity(fields.named.len());
    for field in &fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "expected a named field"))?;
        let ty = field.ty.clone();
        let ty_str = ty.to_token_stream().to_string().replace(' ', "");
        let mut column_name = ident.to_string();
        let mut is_id = false;
        let mut is_skipped = false;

        for attr in &field.attrs {
            if !attr.path().is_ident("fetch") {
                continue;
            }
            // Propagate parse errors to cause a compile error for invalid meta, e.g., #[fetch(column)]
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("column") {
                    let s: LitStr = meta.value()?.parse()?;
                    column_name = s.value();
                    Ok(())
                } else if meta.path.is_ident("id") {
                    is_id = true;
                    Ok(())
                } else if meta.path.is_ident("skip") {
                    is_skipped = true;
                    Ok(())
                } else {
                    Err(meta.error("expected `id`, `skip`, or `column = \"...\"`"))
                }
            })?;
        }
        out.push(FieldMetadata {
            ident,
            ty,
            ty_str,
            column_name,
            is_id,
            is_skipped,
        });
    }
    Ok(out)
}

/// Expression converting `self.<field>` into a `ParamValue`.
fn to_param_value(field: &FieldMetadata) -> syn::Result<proc_macro2::TokenStream> {
    let ident = &field.ident;
    let ty_str = field.ty_str.as_str();
    let display_like = |s: &str| {
        s.ends_with("NaiveDateTime")
            || s.ends_with("NaiveDate")
            || s.ends_with("Decimal")
            || s.ends_with("Uuid")
    };

    if let Some(inner) = get_option_inner(&field.ty) {
        let inner_str = inner.to_token_stream().to_string().replace(' ', "");
        let ts = match inner_str.as_str() {
            "String" => {
                quote! { self.#ident.as_ref().cloned().map(::querymap_core::ParamValue::String).unwrap_or(::querymap_core::ParamValue::Null) }
            }
            "i32" => {
                quote! { self.#ident.map_or(::querymap_core::ParamValue::Null, ::querymap_core::ParamValue::I32) }
            }
            "i64" => {
                quote! { self.#ident.map_or(::querymap_core::ParamValue::Null, ::querymap_core::ParamValue::I64) }
            }
            "f64" => {
                quote! { self.#ident.map_or(::querymap_core::ParamValue::Null, ::querymap_core::ParamValue::F64) }
            }
            "bool" => {
                quote! { self.#ident.map_or(::querymap_core::ParamValue::Null, ::querymap_core::ParamValue::Bool) }
            }
            s if display_like(s) => {
                quote! { self.#ident.as_ref().map(|v| ::querymap_core::ParamValue::String(v.to_string())).unwrap_or(::querymap_core::ParamValue::Null) }
            }
            _ => {
                return Err(syn::Error::new(
                    field.ty.span(),
                    format!("Unsupported Option type for ParamValue: {}. Hint: map this field to a supported type (String/i32/i64/f64/bool), or mark it with #[fetch(skip)] to exclude it from persistence.", ty_str),
                ))
            }
        };
        return Ok(ts);
    }

    let ts = match ty_str {
        "String" => quote! { ::querymap_core::ParamValue::String(self.#ident.clone()) },
        "i32" => quote! { ::querymap_core::ParamValue::I32(self.#ident) },
        "i64" => quote! { ::querymap_core::ParamValue::I64(self.#ident) },
        "f64" => quote! { ::querymap_core::ParamValue::F64(self.#ident) },
        "bool" => quote! { ::querymap_core::ParamValue::Bool(self.#ident) },
        // Portable string form via Display.
        s if display_like(s) => {
            quote! { ::querymap_core::ParamValue::String(self.#ident.to_string()) }
        }
        _ => {
            return Err(syn::Error::new(
                field.ty.span(),
                format!("Unsupported type for ParamValue: {}. Hint: map this field to a supported type (String/i32/i64/f64/bool) or mark it with #[fetch(skip)].", ty_str),
            ))
        }
    };
    Ok(ts)
}

// --- `Entity` derive macro ---

#[proc_macro_derive(Entity, attributes(entity, fetch))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(&input) {
        Ok(ts) => TokenStream::from(ts),
        Err(e) => TokenStream::from(e.to_compile_error()),
    }
}

fn expand_entity(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;
    let fields_metadata = parse_field_metadata(input)?;

    // --- Get table name ---
    // Look for `#[entity(table = "...")]` first.
    let mut table_name_override = None;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        let list = attr.meta.require_list()?;
        let MetaNameValue { path, value, .. } = syn::parse2(list.tokens.clone())?;
        if !path.is_ident("table") {
            return Err(syn::Error::new(path.span(), "expected `table = \"...\"`"));
        }
        table_name_override = Some(value.value());
    }

    // If no override, deduce it from the struct name (`User` -> `users`).
    let table_name = table_name_override
        .unwrap_or_else(|| format!("{}s", struct_name.to_string().to_snake_case()));

    // Basic validation of table and column names to avoid generating invalid SQL identifiers.
    if !is_valid_ident(&table_name) {
        return Err(syn::Error::new(
            struct_name.span(),
            format!("Invalid table name `{}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`.", table_name),
        ));
    }
    for f in fields_metadata.iter().filter(|f| !f.is_skipped) {
        if !is_valid_ident(&f.column_name) {
            return Err(syn::Error::new(
                f.ident.span(),
                format!("Invalid column name `{}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`.", f.column_name),
            ));
        }
    }

    let persisted: Vec<&FieldMetadata> = fields_metadata.iter().filter(|f| !f.is_skipped).collect();

    // --- Implement `Identifiable` ---
    // Validate exactly one #[fetch(id)]
    let id_fields: Vec<&FieldMetadata> = fields_metadata.iter().filter(|f| f.is_id).collect();
    let id_field = match id_fields.as_slice() {
        [one] => *one,
        [] => {
            return Err(syn::Error::new(
                struct_name.span(),
                "A field must be marked with #[fetch(id)]. Hint: mark your primary key field like `#[fetch(id)]`.",
            ))
        }
        many => {
            return Err(syn::Error::new(
                struct_name.span(),
                format!("Exactly one field must be marked with #[fetch(id)] (found {}).", many.len()),
            ))
        }
    };
    if id_field.is_skipped {
        return Err(syn::Error::new(
            id_field.ident.span(),
            "The #[fetch(id)] field cannot also be #[fetch(skip)].",
        ));
    }

    // --- Implement `Fetchable` ---
    let select_columns: Vec<_> = persisted.iter().map(|f| &f.column_name).collect();
    let select_values = persisted
        .iter()
        .map(|f| to_param_value(f))
        .collect::<syn::Result<Vec<_>>>()?;

    let fetchable_impl = quote! {
        impl ::querymap_core::Fetchable for #struct_name {
            const TABLE: &'static str = #table_name;
            const SELECT_COLUMNS: &'static [&'static str] = &[#(#select_columns),*];
            fn column_values(&self) -> Vec<::querymap_core::ParamValue> {
                vec![#(#select_values),*]
            }
        }
    };

    let id_ident = &id_field.ident;
    let id_ty = &id_field.ty;
    let key_ty = get_option_inner(id_ty).unwrap_or(id_ty);
    let id_column_name = &id_field.column_name;

    let (id_accessor, id_setter) = if is_option(id_ty) {
        (
            quote! { self.#id_ident.clone() },
            quote! { self.#id_ident = Some(key); },
        )
    } else {
        (
            quote! { Some(self.#id_ident.clone()) },
            quote! { self.#id_ident = key; },
        )
    };

    let identifiable_impl = quote! {
        impl ::querymap_core::Identifiable for #struct_name {
            type Key = #key_ty;
            const ID_COLUMN: &'static str = #id_column_name;
            fn id(&self) -> Option<Self::Key> {
                #id_accessor
            }
            fn set_id(&mut self, key: Self::Key) {
                #id_setter
            }
        }
    };

    // --- Implement `Insertable` and `Updatable` ---
    let write_fields: Vec<&FieldMetadata> =
        persisted.iter().copied().filter(|f| !f.is_id).collect();
    let write_columns: Vec<_> = write_fields.iter().map(|f| &f.column_name).collect();
    let write_values = write_fields
        .iter()
        .map(|f| to_param_value(f))
        .collect::<syn::Result<Vec<_>>>()?;
    let id_value = to_param_value(id_field)?;

    let insertable_impl = quote! {
        impl ::querymap_core::Insertable for #struct_name {
            const INSERT_COLUMNS: &'static [&'static str] = &[#(#write_columns),*];
            fn insert_values(&self) -> Vec<::querymap_core::ParamValue> {
                vec![#(#write_values),*]
            }
        }
    };

    let updatable_impl = quote! {
        impl ::querymap_core::Updatable for #struct_name {
            const UPDATE_COLUMNS: &'static [&'static str] = &[#(#write_columns),*];
            fn update_values(&self) -> Vec<::querymap_core::ParamValue> {
                vec![#(#write_values,)* #id_value]
            }
        }
    };

    // --- Generate `RowAdapter` ---
    let adapter_struct_name = Ident::new(&format!("{}RowAdapter", struct_name), struct_name.span());

    // Column index follows SELECT_COLUMNS, so skipped fields do not consume an index.
    let mut col_index = 0i32;
    let libsql_get_mappings: Vec<_> = fields_metadata
        .iter()
        .map(|f| {
            let ident = &f.ident;
            if f.is_skipped {
                return quote! { #ident: ::core::default::Default::default() };
            }
            let idx = col_index;
            col_index += 1;
            if f.is_id && is_option(&f.ty) {
                quote! { #ident: Some(row
                    .get(#idx)
                    .map_err(::querymap_core::RepoError::mapping)?) }
            } else {
                quote! { #ident: row
                    .get(#idx)
                    .map_err(::querymap_core::RepoError::mapping)? }
            }
        })
        .collect();

    let row_adapter_impls = quote! {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct #adapter_struct_name;

        // During coverage runs, cargo-llvm-cov sets cfg(coverage). To keep coverage stable in
        // crates that don't link backend crates directly, we disable backend-specific adapters
        // under cfg(coverage).
        #[cfg(all(feature = "backend-adapters", not(coverage)))]
        impl ::querymap_core::RowAdapter<#struct_name> for #adapter_struct_name {
            type Row = ::libsql::Row;
            fn from_row(&self, row: &Self::Row) -> ::querymap_core::RepoResult<#struct_name> {
                Ok(#struct_name {
                    #(#libsql_get_mappings),*
                })
            }
        }
    };

    Ok(quote! {
        #fetchable_impl
        #identifiable_impl
        #insertable_impl
        #updatable_impl
        #row_adapter_impls
    })
}

// --- `repository` attribute macro ---

/// Struct to parse a finder like `find_by_email: String`
struct Finder {
    name: Ident,
    ty: Type,
}

impl Parse for Finder {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Ident = input.parse()?;
        input.parse::<Token![:]>()?;
        let ty: Type = input.parse()?;
        Ok(Finder { name, ty })
    }
}

/// Struct for parsing the main macro arguments
struct RepositoryArgs {
    entity: Type,
    finders: Option<Punctuated<Finder, Token![,]>>,
}

impl Parse for RepositoryArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut entity = None;
        let mut finders = None;

        let attrs = Punctuated::<syn::Meta, Token![,]>::parse_terminated(input)?;
        for meta in attrs {
            match meta {
                syn::Meta::NameValue(nv) => {
                    let ident_str = nv
                        .path
                        .get_ident()
                        .ok_or_else(|| syn::Error::new(nv.path.span(), "Expected an identifier"))?
                        .to_string();
                    match ident_str.as_str() {
                        "entity" => {
                            if let syn::Expr::Path(expr_path) = nv.value {
                                entity = Some(Type::Path(TypePath {
                                    qself: None,
                                    path: expr_path.path,
                                }));
                            } else {
                                return Err(syn::Error::new(
                                    nv.value.span(),
                                    "Expected a type for `entity`",
                                ));
                            }
                        }
                        _ => return Err(syn::Error::new(nv.path.span(), "Unknown attribute")),
                    }
                }
                syn::Meta::List(list) => {
                    if list.path.is_ident("finders") {
                        let parsed_finders = list
                            .parse_args_with(Punctuated::<Finder, Token![,]>::parse_terminated)?;
                        finders = Some(parsed_finders);
                    } else {
                        return Err(syn::Error::new(list.path.span(), "Unknown attribute list"));
                    }
                }
                _ => return Err(syn::Error::new(meta.span(), "Unsupported attribute format")),
            }
        }
        Ok(RepositoryArgs {
            entity: entity
                .ok_or_else(|| syn::Error::new(input.span(), "`entity` is a required attribute"))?,
            finders,
        })
    }
}

fn finder_method(finder: &Finder, entity_ty: &Type) -> proc_macro2::TokenStream {
    let method_name = &finder.name;
    let ty = &finder.ty;
    let finder_str = method_name.to_string();

    let ty_string = ty.to_token_stream().to_string();
    let param_conversion = match ty_string.as_str() {
        "String" => quote! { ::querymap_core::ParamValue::String(value.clone()) },
        "i32" => quote! { ::querymap_core::ParamValue::I32(*value) },
        "i64" => quote! { ::querymap_core::ParamValue::I64(*value) },
        "f64" => quote! { ::querymap_core::ParamValue::F64(*value) },
        "bool" => quote! { ::querymap_core::ParamValue::Bool(*value) },
        _ => {
            let err_msg = format!(
                "Unsupported finder type: {}. Use String, i32, i64, f64, or bool.",
                ty_string
            );
            return quote! { compile_error!(#err_msg); };
        }
    };

    if let Some(field) = finder_str.strip_prefix("find_one_by_") {
        let field_lit = LitStr::new(field, method_name.span());
        quote! {
            /// At most one row; more than one match is `RepoError::TooManyResults`.
            pub async fn #method_name(&self, value: &#ty) -> ::querymap_core::RepoResult<Option<#entity_ty>> {
                let query = ::querymap_core::Query::new().eq(#field_lit, #param_conversion);
                self.inner.select_one(&query).await
            }
        }
    } else if let Some(field) = finder_str.strip_prefix("find_by_") {
        let field_lit = LitStr::new(field, method_name.span());
        quote! {
            pub async fn #method_name(&self, value: &#ty) -> ::querymap_core::RepoResult<Vec<#entity_ty>> {
                self.inner.find_by_field(#field_lit, #param_conversion).await
            }
        }
    } else {
        let err_msg = format!(
            "Finder `{}` must be named `find_by_<column>` or `find_one_by_<column>`.",
            finder_str
        );
        quote! { compile_error!(#err_msg); }
    }
}

#[proc_macro_attribute]
pub fn repository(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as RepositoryArgs);
    let input_mod = parse_macro_input!(item as ItemMod);

    let mod_vis = &input_mod.vis;
    let mod_name = &input_mod.ident;
    let mod_items = input_mod
        .content
        .as_ref()
        .map(|(_, items)| items.clone())
        .unwrap_or_default();
    let entity_ty = &args.entity;

    let find_by_methods: Vec<_> = args
        .finders
        .iter()
        .flatten()
        .map(|f| finder_method(f, entity_ty))
        .collect();

    let expanded = quote! {
        #mod_vis mod #mod_name {
            use super::*;
            use ::querymap_core::Repository as _;

            #(#mod_items)*

            /// Typed wrapper over any backend repository for this entity.
            pub struct Repository<R>
            where
                R: ::querymap_core::Repository<#entity_ty>,
            {
                inner: R,
            }

            impl<R> Repository<R>
            where
                R: ::querymap_core::Repository<#entity_ty>,
            {
                pub fn new(inner: R) -> Self {
                    Self { inner }
                }

                pub fn inner(&self) -> &R {
                    &self.inner
                }

                pub fn into_inner(self) -> R {
                    self.inner
                }

                #(#find_by_methods)*
            }

            #[::querymap_core::async_trait]
            impl<R> ::querymap_core::Repository<#entity_ty> for Repository<R>
            where
                R: ::querymap_core::Repository<#entity_ty>,
            {
                async fn find_by_id(&self, id: &<#entity_ty as ::querymap_core::Identifiable>::Key) -> ::querymap_core::RepoResult<Option<#entity_ty>> {
                    self.inner.find_by_id(id).await
                }

                async fn insert(&self, entity: &#entity_ty) -> ::querymap_core::RepoResult<#entity_ty> {
                    self.inner.insert(entity).await
                }

                async fn update(&self, entity: &#entity_ty) -> ::querymap_core::RepoResult<#entity_ty> {
                    self.inner.update(entity).await
                }

                async fn delete_by_id(&self, id: &<#entity_ty as ::querymap_core::Identifiable>::Key) -> ::querymap_core::RepoResult<bool> {
                    self.inner.delete_by_id(id).await
                }

                async fn select_list(&self, query: &::querymap_core::Query) -> ::querymap_core::RepoResult<Vec<#entity_ty>> {
                    self.inner.select_list(query).await
                }

                async fn select_count(&self, query: &::querymap_core::Query) -> ::querymap_core::RepoResult<u64> {
                    self.inner.select_count(query).await
                }

                async fn delete_matching(&self, query: &::querymap_core::Query) -> ::querymap_core::RepoResult<u64> {
                    self.inner.delete_matching(query).await
                }
            }
        }
    };

    TokenStream::from(expanded)
}
