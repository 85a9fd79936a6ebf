//! Derive macro for the `imbue-core` reflection traits.
//!
//! ```ignore
//! #[derive(Reflect)]
//! struct Record {
//!     id: u64,
//!     #[imbue(rename = "display_name")]
//!     name: String,
//!     #[imbue(skip)]
//!     cached: bool,
//!     #[imbue(flatten)]
//!     common: CommonFields,
//! }
//! ```
//!
//! The derive emits `Shaped`, `Reflect`, and `Struct` impls. A container
//! marked `#[imbue(binary)]` additionally wires its own
//! `BinaryUnmarshal` implementation into the reflection surface, so the
//! decoding engine hands it whole byte payloads.
//!
//! Only structs with named fields and without generic parameters are
//! supported; anything else implements the traits by hand.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr};

/// Derives `imbue_core::Shaped`, `imbue_core::Reflect`, and
/// `imbue_core::Struct` for a struct with named fields.
///
/// Field attributes: `#[imbue(rename = "...")]`, `#[imbue(skip)]`,
/// `#[imbue(flatten)]`. Container attribute: `#[imbue(binary)]`.
#[proc_macro_derive(Reflect, attributes(imbue))]
pub fn derive_reflect(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct FieldMeta {
    rename: Option<String>,
    skip: bool,
    flatten: bool,
}

fn field_meta(field: &syn::Field) -> syn::Result<FieldMeta> {
    let mut meta = FieldMeta {
        rename: None,
        skip: false,
        flatten: false,
    };
    for attr in &field.attrs {
        if !attr.path().is_ident("imbue") {
            continue;
        }
        attr.parse_nested_meta(|nested| {
            if nested.path.is_ident("rename") {
                let lit: LitStr = nested.value()?.parse()?;
                meta.rename = Some(lit.value());
                Ok(())
            } else if nested.path.is_ident("skip") {
                meta.skip = true;
                Ok(())
            } else if nested.path.is_ident("flatten") {
                meta.flatten = true;
                Ok(())
            } else {
                Err(nested.error("expected `rename`, `skip`, or `flatten`"))
            }
        })?;
    }
    Ok(meta)
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "#[derive(Reflect)] does not support generic types; implement the traits manually",
        ));
    }

    let mut binary = false;
    for attr in &input.attrs {
        if !attr.path().is_ident("imbue") {
            continue;
        }
        attr.parse_nested_meta(|nested| {
            if nested.path.is_ident("binary") {
                binary = true;
                Ok(())
            } else {
                Err(nested.error("expected `binary`"))
            }
        })?;
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "#[derive(Reflect)] requires named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "#[derive(Reflect)] only supports structs",
            ))
        }
    };

    let mut field_defs = Vec::new();
    let mut field_arms = Vec::new();
    let mut zero_stmts = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        let ident = field
            .ident
            .as_ref()
            .expect("named fields always have idents");
        let ty = &field.ty;
        let meta = field_meta(field)?;

        let name_lit = ident.to_string();
        let rename_tokens = match &meta.rename {
            Some(rename) => quote!(::core::option::Option::Some(#rename)),
            None => quote!(::core::option::Option::None),
        };
        let skip = meta.skip;
        let flatten = meta.flatten;

        field_defs.push(quote! {
            ::imbue_core::FieldDef {
                name: #name_lit,
                rename: #rename_tokens,
                skip: #skip,
                flatten: #flatten,
                shape: <#ty as ::imbue_core::Shaped>::shape,
            }
        });
        field_arms.push(quote! {
            #index => ::core::option::Option::Some(&mut self.#ident),
        });
        zero_stmts.push(quote! {
            ::imbue_core::Reflect::set_zero(&mut self.#ident);
        });
    }

    let field_count = fields.len();
    let name_str = name.to_string();

    let unmarshal_impl = if binary {
        quote! {
            fn as_binary_unmarshal(
                &mut self,
            ) -> ::core::option::Option<&mut dyn ::imbue_core::BinaryUnmarshal> {
                ::core::option::Option::Some(self)
            }
        }
    } else {
        quote!()
    };

    Ok(quote! {
        #[automatically_derived]
        impl ::imbue_core::Shaped for #name {
            fn shape() -> &'static ::imbue_core::Shape {
                static FIELDS: [::imbue_core::FieldDef; #field_count] = [#(#field_defs),*];
                static SHAPE: ::imbue_core::Shape = ::imbue_core::Shape {
                    type_name: #name_str,
                    id: ::core::any::TypeId::of::<#name>,
                    kind: ::imbue_core::ShapeKind::Struct { fields: &FIELDS },
                    binary_unmarshal: #binary,
                };
                &SHAPE
            }
        }

        #[automatically_derived]
        impl ::imbue_core::Reflect for #name {
            fn reflect_shape(&self) -> &'static ::imbue_core::Shape {
                <Self as ::imbue_core::Shaped>::shape()
            }

            fn reflect_mut(&mut self) -> ::imbue_core::ReflectMut<'_> {
                ::imbue_core::ReflectMut::Struct(self)
            }

            fn set_zero(&mut self) {
                #(#zero_stmts)*
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::core::any::Any {
                self
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::core::any::Any> {
                self
            }

            #unmarshal_impl
        }

        #[automatically_derived]
        impl ::imbue_core::Struct for #name {
            fn field_len(&self) -> usize {
                #field_count
            }

            fn field_mut(
                &mut self,
                index: usize,
            ) -> ::core::option::Option<&mut dyn ::imbue_core::Reflect> {
                match index {
                    #(#field_arms)*
                    _ => ::core::option::Option::None,
                }
            }
        }
    })
}
